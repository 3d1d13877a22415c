//! The tunable constants of the archive, collected in one place.

use std::time::Duration;

/// Default TCP listen port for the server.
pub const LISTEN_PORT: u16 = 8001;

/// How many zgrams past the visible page a subscription pre-fetches, to
/// report "3", "4", "5", "5+"-style estimates to the user.
pub const PAGE_MARGIN: usize = 3;

/// How often the server advances the (currently inert) purge timer.
pub const PURGE_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// How often the frozen tier is rebuilt from the logs.
pub const REINDEXING_INTERVAL: Duration = Duration::from_secs(8 * 60 * 60);

/// How long unlogged (graffiti) zgrams are retained before a reindex
/// purges their plaintext files.
pub const UNLOGGED_LIFESPAN: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// How many zgram offsets an iterator is asked for per pull.
pub const ITERATOR_CHUNK_SIZE: usize = 256;

/// Capacity of the LRU cache of zgram bodies.
pub const ZGRAM_CACHE_SIZE: usize = 500;

/// Longest plus-plus key we are willing to track.
pub const MAX_PLUS_PLUS_KEY_SIZE: usize = 256;

/// How long the server loop sleeps when there is nothing to do.
pub const SERVER_TICK: Duration = Duration::from_secs(30);

/// The synthetic operator identity used for unattributed server posts.
pub const ZALEXA_ID: &str = "zalexa";
pub const ZALEXA_SIGNATURE: &str = "Zalexa";

/// Instances with this prefix are unlogged: they go to the short-retention
/// log tree and disappear after [`UNLOGGED_LIFESPAN`].
pub const GRAFFITI_PREFIX: &str = "graffiti";
