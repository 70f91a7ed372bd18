//! Configuration for the sync engine.

use crate::error::{EngineError, EngineResult};
use jobmirror_model::FileRecord;
use std::collections::BTreeSet;
use std::time::Duration;

/// Which files of a job are mirrored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum FileFilter {
    /// Every file.
    #[default]
    All,
    /// Files whose lowercased extension is in the set.
    Extensions(BTreeSet<String>),
}

impl FileFilter {
    /// Common video and audio containers a media player can preview.
    pub fn previewable() -> Self {
        Self::extensions([
            "3gp", "aac", "avi", "flac", "flv", "m2ts", "m4a", "m4v", "mka", "mkv", "mov", "mp3",
            "mp4", "mpeg", "mpg", "ogg", "ogm", "ts", "vob", "wav", "webm", "wmv",
        ])
    }

    /// Builds an extension filter. Leading dots and case are ignored.
    pub fn extensions<I, E>(extensions: I) -> Self
    where
        I: IntoIterator<Item = E>,
        E: AsRef<str>,
    {
        Self::Extensions(
            extensions
                .into_iter()
                .map(|ext| ext.as_ref().trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        )
    }

    /// Returns true if the file should be mirrored.
    pub fn matches(&self, file: &FileRecord) -> bool {
        match self {
            FileFilter::All => true,
            FileFilter::Extensions(allowed) => file
                .extension()
                .is_some_and(|ext| allowed.contains(&ext)),
        }
    }

    /// Keeps only the files the filter accepts.
    pub fn apply(&self, files: Vec<FileRecord>) -> Vec<FileRecord> {
        match self {
            FileFilter::All => files,
            FileFilter::Extensions(_) => files.into_iter().filter(|f| self.matches(f)).collect(),
        }
    }
}

/// Configuration for the sync engine and its coordinator.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Commit interval while the store is healthy.
    pub commit_interval_base: Duration,
    /// Upper bound of the commit interval under repeated failure.
    pub commit_interval_max: Duration,
    /// Capacity of the notification channel.
    pub channel_capacity: usize,
    /// Commit right after an "added" notification instead of waiting for
    /// the timer.
    pub commit_on_added: bool,
    /// Which files are mirrored.
    pub file_filter: FileFilter,
}

impl EngineConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self {
            commit_interval_base: Duration::from_millis(1000),
            commit_interval_max: Duration::from_millis(5000),
            channel_capacity: 1024,
            commit_on_added: true,
            file_filter: FileFilter::All,
        }
    }

    /// Sets the base commit interval.
    pub fn with_commit_interval_base(mut self, interval: Duration) -> Self {
        self.commit_interval_base = interval;
        self
    }

    /// Sets the maximum commit interval.
    pub fn with_commit_interval_max(mut self, interval: Duration) -> Self {
        self.commit_interval_max = interval;
        self
    }

    /// Sets the notification channel capacity.
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// Enables or disables committing on "added".
    pub fn with_commit_on_added(mut self, enabled: bool) -> Self {
        self.commit_on_added = enabled;
        self
    }

    /// Sets the file filter.
    pub fn with_file_filter(mut self, filter: FileFilter) -> Self {
        self.file_filter = filter;
        self
    }

    /// Rejects configurations the engine cannot run with.
    pub fn validate(&self) -> EngineResult<()> {
        if self.commit_interval_base.is_zero() {
            return Err(EngineError::Config("commit_interval_base must be positive".into()));
        }
        if self.commit_interval_max < self.commit_interval_base {
            return Err(EngineError::Config(format!(
                "commit_interval_max ({:?}) is below commit_interval_base ({:?})",
                self.commit_interval_max, self.commit_interval_base
            )));
        }
        if self.channel_capacity == 0 {
            return Err(EngineError::Config("channel_capacity must be positive".into()));
        }
        if let FileFilter::Extensions(extensions) = &self.file_filter {
            if let Some(bad) = extensions
                .iter()
                .find(|ext| ext.is_empty() || ext.contains(&['.', '/', '\\'][..]))
            {
                return Err(EngineError::Config(format!("invalid file extension {bad:?}")));
            }
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobmirror_model::FileIndex;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        assert_eq!(config.commit_interval_base, Duration::from_millis(1000));
        assert_eq!(config.commit_interval_max, Duration::from_millis(5000));
        config.validate().unwrap();
    }

    #[test]
    fn builder() {
        let config = EngineConfig::new()
            .with_commit_interval_base(Duration::from_millis(10))
            .with_commit_interval_max(Duration::from_millis(80))
            .with_channel_capacity(4)
            .with_commit_on_added(false);
        assert_eq!(config.commit_interval_base, Duration::from_millis(10));
        assert_eq!(config.commit_interval_max, Duration::from_millis(80));
        assert_eq!(config.channel_capacity, 4);
        assert!(!config.commit_on_added);
    }

    #[test]
    fn rejects_inverted_intervals() {
        let config = EngineConfig::new()
            .with_commit_interval_base(Duration::from_secs(10))
            .with_commit_interval_max(Duration::from_secs(1));
        assert!(matches!(config.validate(), Err(EngineError::Config(_))));
    }

    #[test]
    fn rejects_zero_values() {
        assert!(EngineConfig::new()
            .with_commit_interval_base(Duration::ZERO)
            .validate()
            .is_err());
        assert!(EngineConfig::new().with_channel_capacity(0).validate().is_err());
    }

    #[test]
    fn rejects_malformed_extension() {
        let config = EngineConfig::new().with_file_filter(FileFilter::extensions(["tar.gz"]));
        assert!(config.validate().is_err());
    }

    #[test]
    fn extension_filter() {
        let filter = FileFilter::extensions([".MKV", "srt"]);
        assert!(filter.matches(&FileRecord::new(FileIndex(0), "a/b.mkv", 1)));
        assert!(filter.matches(&FileRecord::new(FileIndex(1), "b.SRT", 1)));
        assert!(!filter.matches(&FileRecord::new(FileIndex(2), "b.nfo", 1)));
        assert!(!filter.matches(&FileRecord::new(FileIndex(3), "noext", 1)));

        let kept = filter.apply(vec![
            FileRecord::new(FileIndex(0), "a.mkv", 1),
            FileRecord::new(FileIndex(1), "a.txt", 1),
        ]);
        assert_eq!(kept.len(), 1);
        assert!(FileFilter::previewable().matches(&FileRecord::new(FileIndex(0), "x.mp4", 1)));
    }
}
