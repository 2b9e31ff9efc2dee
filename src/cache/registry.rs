//! Cache version registry.
//!
//! Every namespace the site caches is listed here with its current schema
//! version. Bumping a version orphans the namespace's old entries: readers
//! compute keys under the new version and treat anything else as a miss.

use std::fmt;
use std::str::FromStr;

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;

/// A cached namespace known to the site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheNamespace {
    /// Merged feed of recent posts, notes and repository activity.
    ActivityFeed,
    /// Raw events fetched from the GitHub API.
    GithubActivity,
    /// Rendered blog index listing.
    BlogIndex,
    /// Per-page view counters.
    PageViews,
}

impl CacheNamespace {
    const ALL: [Self; 4] = [
        Self::ActivityFeed,
        Self::GithubActivity,
        Self::BlogIndex,
        Self::PageViews,
    ];

    pub fn all() -> impl Iterator<Item = Self> {
        Self::ALL.into_iter()
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::ActivityFeed => "activity-feed",
            Self::GithubActivity => "github-activity",
            Self::BlogIndex => "blog-index",
            Self::PageViews => "page-views",
        }
    }

    /// Current schema version. Bump when the cached data shape changes.
    pub fn version(self) -> u32 {
        match self {
            // v2: items carry `source` instead of a free-form `kind`.
            Self::ActivityFeed => 2,
            Self::GithubActivity => 1,
            Self::BlogIndex => 1,
            Self::PageViews => 1,
        }
    }

    pub fn default_ttl_seconds(self) -> u64 {
        match self {
            Self::ActivityFeed => 15 * MINUTE,
            Self::GithubActivity => 30 * MINUTE,
            Self::BlogIndex => HOUR,
            Self::PageViews => 5 * MINUTE,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::ActivityFeed => "Merged activity feed shown on the home page",
            Self::GithubActivity => "Recent GitHub events for the activity feed",
            Self::BlogIndex => "Blog index listing",
            Self::PageViews => "Page view counters",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::all().find(|namespace| namespace.name() == name)
    }
}

impl fmt::Display for CacheNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CacheNamespace {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::from_name(value).ok_or_else(|| {
            let known: Vec<&str> = Self::all().map(Self::name).collect();
            format!("unknown cache namespace `{value}` (known: {})", known.join(", "))
        })
    }
}

/// Current version of the namespace called `name`, if it is registered.
pub fn current_version(name: &str) -> Option<u32> {
    CacheNamespace::from_name(name).map(CacheNamespace::version)
}
