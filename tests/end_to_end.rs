//! Full pipeline over real TCP sockets: dispatch pool ← coordinator ← workers.

use image::{Rgb, RgbImage};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

use dct_cluster::common::config::{
    ContainerFormat, CoordinatorConfig, DispatchSettings, WorkerConfig,
};
use dct_cluster::coordinator::Coordinator;
use dct_cluster::dispatch::DispatchPool;
use dct_cluster::processing::codec;
use dct_cluster::worker::WorkerNode;
use dct_cluster::ClusterError;

struct Cluster {
    pool: Arc<DispatchPool>,
    coordinator: Arc<Coordinator>,
    worker_address: String,
}

impl Cluster {
    async fn start() -> Self {
        let front_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let front_address = front_listener.local_addr().unwrap().to_string();
        let pool = Arc::new(DispatchPool::new(DispatchSettings {
            max_concurrent_callers: 8,
            admission_wait: Duration::from_secs(5),
            reply_timeout: Duration::from_secs(30),
        }));
        let acceptor = pool.clone();
        tokio::spawn(async move { acceptor.serve_coordinators(front_listener).await });

        let worker_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let worker_address = worker_listener.local_addr().unwrap().to_string();
        let coordinator = Arc::new(Coordinator::new(CoordinatorConfig {
            upstream_address: front_address,
            worker_listen_address: worker_address.clone(),
            job_timeout_secs: 20,
            reconnect_delay_ms: 20,
            output: ContainerFormat::Png,
        }));
        let runner = coordinator.clone();
        tokio::spawn(async move { runner.serve(worker_listener).await });

        let cluster = Self {
            pool,
            coordinator,
            worker_address,
        };
        for _ in 0..500 {
            if cluster.pool.link_count().await == 1 {
                return cluster;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("coordinator never connected to the front end");
    }

    async fn add_workers(&self, count: usize) {
        let expected = self.coordinator.pool().len().await + count;
        for _ in 0..count {
            let node = WorkerNode::new(WorkerConfig {
                coordinator_address: self.worker_address.clone(),
                reconnect_delay_ms: 20,
                output: ContainerFormat::Png,
            });
            tokio::spawn(async move { node.run().await });
        }

        for _ in 0..500 {
            if self.coordinator.pool().len().await == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("workers never joined the coordinator");
    }
}

fn gray_png(width: u32, height: u32, value: u8) -> Vec<u8> {
    let image = RgbImage::from_pixel(width, height, Rgb([value, value, value]));
    codec::encode(&image, ContainerFormat::Png).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_gray_image_across_four_workers() {
    let cluster = Cluster::start().await;
    cluster.add_workers(4).await;

    let output = cluster.pool.submit(gray_png(64, 64, 128)).await.unwrap();
    let image = codec::decode(&output).unwrap();

    assert_eq!(image.dimensions(), (64, 64));
    assert!(image.pixels().all(|p| *p == Rgb([128, 128, 128])));

    let stats = cluster.pool.stats().snapshot();
    assert_eq!(stats.submitted, 1);
    assert_eq!(stats.completed, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_remainder_rows_are_dropped() {
    let cluster = Cluster::start().await;
    cluster.add_workers(4).await;

    // 70 rows over 4 strips: strip height 17, two rows lost.
    let output = cluster.pool.submit(gray_png(40, 70, 200)).await.unwrap();
    let image = codec::decode(&output).unwrap();

    assert_eq!(image.dimensions(), (40, 68));
    assert!(image.pixels().all(|p| *p == Rgb([200, 200, 200])));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sequential_jobs_reuse_workers() {
    let cluster = Cluster::start().await;
    cluster.add_workers(2).await;

    for value in [0u8, 128, 252] {
        let output = cluster.pool.submit(gray_png(16, 16, value)).await.unwrap();
        let image = codec::decode(&output).unwrap();
        assert_eq!(image.dimensions(), (16, 16));
        assert!(image.pixels().all(|p| *p == Rgb([value, value, value])));
    }
    assert_eq!(cluster.coordinator.pool().busy_count().await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_job_without_workers_reports_failure() {
    let cluster = Cluster::start().await;

    match cluster.pool.submit(gray_png(8, 8, 10)).await {
        Err(ClusterError::JobFailed(reason)) => assert_eq!(reason, "no workers available"),
        other => panic!("unexpected result: {:?}", other.map(|b| b.len())),
    }

    // The coordinator link survives a failed job.
    assert_eq!(cluster.pool.link_count().await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_undecodable_upload_reports_failure() {
    let cluster = Cluster::start().await;
    cluster.add_workers(1).await;

    assert!(matches!(
        cluster.pool.submit(b"definitely not an image".to_vec()).await,
        Err(ClusterError::JobFailed(_))
    ));
}
