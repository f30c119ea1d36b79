//! Heap snapshots for a managed runtime: capture global and static roots into
//! a replayable text artifact, and restore an equivalent live state from it.
pub mod artifact;
pub mod config;
pub mod error;
pub mod facade;
pub mod ir;
pub mod restore;
pub mod runtime;
pub mod snapshot;

pub use config::{SnapshotConfig, SnapshotOptions};
pub use error::{Error, Result};
pub use facade::{Facade, Library};
pub use restore::{RestoreReport, Restorer, Reviver};
pub use runtime::Runtime;
pub use runtime::types::{TypeDescriptor, TypeName, TypeRegistry};
pub use runtime::value::{Handle, HandleRef, Key, ObjectRef, Value};
pub use snapshot::handler::ValueHandler;
pub use snapshot::{SnapshotReport, Snapshotter};
