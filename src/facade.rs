//! Install/uninstall surface over an explicit context object.
use std::path::Path;

use tracing::info;

use crate::config::SnapshotConfig;
use crate::error::{Error, Result};
use crate::restore::{RestoreReport, Restorer};
use crate::runtime::Runtime;
use crate::snapshot::{SnapshotReport, Snapshotter};

/// A configured snapshotter/restorer pair.
pub struct Library {
    snapshotter: Snapshotter,
    restorer: Restorer,
}

impl Library {
    pub fn new(config: SnapshotConfig) -> Self {
        let SnapshotConfig { options, handlers, revivers } = config;
        Self {
            snapshotter: Snapshotter::new(&options, handlers),
            restorer: Restorer::new().with_revivers(revivers),
        }
    }

    pub fn take_snapshot(&self, runtime: &Runtime, path: impl AsRef<Path>) -> Result<SnapshotReport> {
        self.snapshotter.take_snapshot(runtime, path)
    }

    pub fn restore(&self, runtime: &mut Runtime, path: impl AsRef<Path>) -> Result<RestoreReport> {
        self.restorer.restore(runtime, path)
    }

    /// Lifecycle hook, run when the library is replaced or removed.
    pub fn uninstall(&self) {
        info!("snapshot library uninstalled");
    }
}

#[derive(Default)]
pub struct Facade {
    library: Option<Library>,
}

impl Facade {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(&mut self, config: SnapshotConfig) -> Option<Library> {
        self.set_library(Library::new(config))
    }

    /// Install `library`, uninstalling and returning the previous one.
    pub fn set_library(&mut self, library: Library) -> Option<Library> {
        let previous = self.library.replace(library);
        if let Some(old) = &previous {
            old.uninstall();
        }
        info!("snapshot library installed");
        previous
    }

    pub fn uninstall(&mut self) -> Option<Library> {
        let previous = self.library.take();
        if let Some(old) = &previous {
            old.uninstall();
        }
        previous
    }

    pub fn is_installed(&self) -> bool {
        self.library.is_some()
    }

    fn library(&self) -> Result<&Library> {
        self.library.as_ref().ok_or(Error::NotInstalled)
    }

    pub fn take_snapshot(&self, runtime: &Runtime, path: impl AsRef<Path>) -> Result<SnapshotReport> {
        self.library()?.take_snapshot(runtime, path)
    }

    pub fn restore(&self, runtime: &mut Runtime, path: impl AsRef<Path>) -> Result<RestoreReport> {
        self.library()?.restore(runtime, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::types::TypeRegistry;

    #[test]
    fn operations_require_an_installed_library() {
        let mut facade = Facade::new();
        let mut rt = Runtime::new(TypeRegistry::new());
        assert!(matches!(facade.take_snapshot(&rt, "unused.snap"), Err(Error::NotInstalled)));
        assert!(matches!(facade.restore(&mut rt, "unused.snap"), Err(Error::NotInstalled)));

        assert!(facade.install(SnapshotConfig::default()).is_none());
        assert!(facade.is_installed());
        assert!(facade.install(SnapshotConfig::default()).is_some());
        assert!(facade.uninstall().is_some());
        assert!(!facade.is_installed());
    }
}
