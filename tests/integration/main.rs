//! OTA toolkit integration tests.
//!
//! These drive the crates end to end without a broker: a simulated
//! publisher feeds control and chunk messages straight into a session, and
//! the packer round-trips real files through a temp directory.

mod packing;
mod transfer;

use std::path::PathBuf;

/// A unique scratch directory per test, removed on drop.
pub struct Scratch(pub PathBuf);

impl Scratch {
    pub fn new(tag: &str) -> Self {
        let dir = std::env::temp_dir().join(format!("otakit-it-{tag}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).expect("create scratch dir");
        Self(dir)
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.0.join(name)
    }
}

impl Drop for Scratch {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.0);
    }
}
