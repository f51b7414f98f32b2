//! Mount configuration for the passthrough filesystem.

use std::time::Duration;

/// Default time-to-live for entry and attribute replies (one minute).
pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

/// Smallest TTL handed out; keeps expirations strictly in the future.
pub const MIN_TTL: Duration = Duration::from_millis(1);

/// Default capacity of the request dispatch queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Configuration options for the FUSE filesystem.
#[derive(Debug, Clone)]
pub struct MountConfig {
    /// How long the kernel may cache a name -> inode entry.
    pub entry_ttl: Duration,

    /// How long the kernel may cache inode attributes.
    pub attr_ttl: Duration,

    /// Number of worker threads handlers run on.
    ///
    /// Default: number of logical CPUs (at least 2).
    pub worker_threads: usize,

    /// Capacity of the queue between the FUSE session and the workers.
    pub queue_capacity: usize,

    /// Let users other than the mounting user access the mount.
    pub allow_other: bool,

    /// Ask the kernel to unmount when the driver process exits.
    pub auto_unmount: bool,

    /// Filesystem name shown in the mount table.
    pub fs_name: String,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            entry_ttl: DEFAULT_TTL,
            attr_ttl: DEFAULT_TTL,
            worker_threads: num_cpus::get().max(2),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            allow_other: false,
            auto_unmount: true,
            fs_name: "mftfs".to_string(),
        }
    }
}

impl MountConfig {
    /// Sets both entry and attribute TTLs.
    #[must_use]
    pub fn ttl(mut self, ttl: Duration) -> Self {
        let ttl = ttl.max(MIN_TTL);
        self.entry_ttl = ttl;
        self.attr_ttl = ttl;
        self
    }

    /// Sets the entry TTL only.
    #[must_use]
    pub fn entry_ttl(mut self, ttl: Duration) -> Self {
        self.entry_ttl = ttl.max(MIN_TTL);
        self
    }

    /// Sets the attribute TTL only.
    #[must_use]
    pub fn attr_ttl(mut self, ttl: Duration) -> Self {
        self.attr_ttl = ttl.max(MIN_TTL);
        self
    }

    /// Sets the number of handler worker threads.
    #[must_use]
    pub fn worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads.max(1);
        self
    }

    /// Sets the dispatch queue capacity.
    #[must_use]
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Sets whether other users may access the mount.
    #[must_use]
    pub fn allow_other(mut self, allow: bool) -> Self {
        self.allow_other = allow;
        self
    }

    /// Sets whether the kernel unmounts when the process exits.
    #[must_use]
    pub fn auto_unmount(mut self, enabled: bool) -> Self {
        self.auto_unmount = enabled;
        self
    }

    /// Sets the filesystem name shown in the mount table.
    #[must_use]
    pub fn fs_name(mut self, name: impl Into<String>) -> Self {
        self.fs_name = name.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MountConfig::default();
        assert_eq!(config.entry_ttl, Duration::from_secs(60));
        assert_eq!(config.attr_ttl, Duration::from_secs(60));
        assert!(config.worker_threads >= 2);
        assert!(config.auto_unmount);
        assert!(!config.allow_other);
    }

    #[test]
    fn test_builder_pattern() {
        let config = MountConfig::default()
            .ttl(Duration::from_secs(5))
            .worker_threads(4)
            .allow_other(true)
            .fs_name("backing");
        assert_eq!(config.entry_ttl, Duration::from_secs(5));
        assert_eq!(config.attr_ttl, Duration::from_secs(5));
        assert_eq!(config.worker_threads, 4);
        assert!(config.allow_other);
        assert_eq!(config.fs_name, "backing");
    }

    #[test]
    fn test_zero_values_are_clamped() {
        let config = MountConfig::default()
            .ttl(Duration::ZERO)
            .worker_threads(0)
            .queue_capacity(0);
        assert_eq!(config.entry_ttl, MIN_TTL);
        assert_eq!(config.attr_ttl, MIN_TTL);
        assert_eq!(config.worker_threads, 1);
        assert_eq!(config.queue_capacity, 1);
    }
}
