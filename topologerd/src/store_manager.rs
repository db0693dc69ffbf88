use std::thread;
use tokio::sync::{mpsc, oneshot, watch};
use anyhow::Result;
use shared::types::{MapProjection, MeasurementSystem, PathDetail, PathSummary, Router, RouterSummary};
use crate::config::SystemConfig;
use crate::store::db::{NewPath, PathFilter, RouterFilter, RouterUpsert, TopologyDb};
use crate::store::hash;

/// Commands sent to the store thread
pub enum StoreCommand {
    EnsureSystem(SystemConfig, oneshot::Sender<Result<MeasurementSystem>>),
    UpsertRouter(RouterUpsert, oneshot::Sender<Result<Router>>),
    CreatePath(NewPath, oneshot::Sender<Result<i64>>),
    GetPath(i64, oneshot::Sender<Result<Option<PathDetail>>>),
    ListPaths(PathFilter, oneshot::Sender<Result<Vec<PathSummary>>>),
    ListRouters(RouterFilter, oneshot::Sender<Result<Vec<RouterSummary>>>),
    MapProjection(oneshot::Sender<Result<MapProjection>>),
    Shutdown,
}

/// Handle to the topology database.
/// All commands run in order on one thread, so every upsert is atomic with
/// respect to the router address key.
#[derive(Clone)]
pub struct StoreHandle {
    tx: mpsc::Sender<StoreCommand>,
}

impl StoreHandle {
    /// Spawn a new store thread with the given database
    pub fn spawn(db: TopologyDb, hash_tx: watch::Sender<String>) -> Self {
        let (tx, mut rx) = mpsc::channel::<StoreCommand>(256);

        // Recompute the map hash after a path lands
        let recompute_hash = |db: &TopologyDb, hash_tx: &watch::Sender<String>| {
            match db.map_projection() {
                Ok(map) => {
                    let _ = hash_tx.send(hash::compute_hash(&map));
                }
                Err(e) => tracing::warn!("Failed to recompute map hash: {}", e),
            }
        };

        thread::spawn(move || {
            while let Some(cmd) = rx.blocking_recv() {
                match cmd {
                    StoreCommand::EnsureSystem(system, reply) => {
                        let _ = reply.send(db.ensure_system(&system));
                    }
                    StoreCommand::UpsertRouter(router, reply) => {
                        let _ = reply.send(db.upsert_router(&router));
                    }
                    StoreCommand::CreatePath(path, reply) => {
                        let result = db.create_path(&path);
                        if result.is_ok() {
                            recompute_hash(&db, &hash_tx);
                        }
                        let _ = reply.send(result);
                    }
                    StoreCommand::GetPath(id, reply) => {
                        let _ = reply.send(db.get_path(id));
                    }
                    StoreCommand::ListPaths(filter, reply) => {
                        let _ = reply.send(db.list_paths(&filter));
                    }
                    StoreCommand::ListRouters(filter, reply) => {
                        let _ = reply.send(db.list_routers(&filter));
                    }
                    StoreCommand::MapProjection(reply) => {
                        let _ = reply.send(db.map_projection());
                    }
                    StoreCommand::Shutdown => {
                        tracing::info!("Store thread shutting down");
                        break;
                    }
                }
            }
        });

        Self { tx }
    }

    /// Get or create the measurement system for this deployment
    pub async fn ensure_system(&self, system: SystemConfig) -> Result<MeasurementSystem> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(StoreCommand::EnsureSystem(system, reply)).await?;
        rx.await?
    }

    /// Insert or merge a router by address
    pub async fn upsert_router(&self, router: RouterUpsert) -> Result<Router> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(StoreCommand::UpsertRouter(router, reply)).await?;
        rx.await?
    }

    /// Persist a path with all its links
    pub async fn create_path(&self, path: NewPath) -> Result<i64> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(StoreCommand::CreatePath(path, reply)).await?;
        rx.await?
    }

    pub async fn get_path(&self, id: i64) -> Result<Option<PathDetail>> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(StoreCommand::GetPath(id, reply)).await?;
        rx.await?
    }

    pub async fn list_paths(&self, filter: PathFilter) -> Result<Vec<PathSummary>> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(StoreCommand::ListPaths(filter, reply)).await?;
        rx.await?
    }

    pub async fn list_routers(&self, filter: RouterFilter) -> Result<Vec<RouterSummary>> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(StoreCommand::ListRouters(filter, reply)).await?;
        rx.await?
    }

    pub async fn map_projection(&self) -> Result<MapProjection> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(StoreCommand::MapProjection(reply)).await?;
        rx.await?
    }

    /// Shutdown the store thread
    pub async fn shutdown(&self) -> Result<()> {
        self.tx.send(StoreCommand::Shutdown).await?;
        Ok(())
    }
}
