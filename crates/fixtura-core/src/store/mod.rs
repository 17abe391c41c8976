//! Persistent Storage Layer (SQLite WAL)
//!
//! Durable bookkeeping of the pods and containers a supervisor manages, so that
//! a later run can clean up after a crashed one. SQLite in WAL mode gives:
//! - Concurrent readers alongside a single writer
//! - Serialized, transactional writes across processes sharing one file
//! - Foreign keys from containers to their pods
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  ContainerStore                     │
//! ├─────────────────────────────────────────────────────┤
//! │  schema_version  │  pods  │  containers  │  audit   │
//! │  (single row)    │        │  (FK → pods) │ (append) │
//! └─────────────────────────────────────────────────────┘
//!         ↓ WAL mode: concurrent reads, serialized writes
//! ```
//!
//! A record is written *before* the runtime process is spawned and removed
//! only after the runtime has been asked to remove the resource.
//!
//! # Example
//!
//! ```no_run
//! use fixtura_core::store::ContainerStore;
//! use fixtura_core::ContainerRecord;
//!
//! # fn example() -> fixtura_core::Result<()> {
//! let mut store = ContainerStore::open("/tmp/fixtura/shop.db")?;
//! store.container_put(&ContainerRecord::new("FIXTURA-shop-ABC"))?;
//! for record in store.container_list()? {
//!     println!("{}", record.name);
//! }
//! # Ok(())
//! # }
//! ```

pub mod container_store;
pub mod schema;

pub use container_store::ContainerStore;
pub use schema::SCHEMA_VERSION;
