pub mod aggregator;
pub mod apple_music;
pub mod auth;
pub mod cache;
pub mod cache_index;
pub mod http;
pub mod json_scan;
pub mod lookup;
pub mod object_store;
pub mod spotify;
pub mod tidal;

pub use aggregator::Aggregator;
pub use apple_music::AppleMusicLookup;
pub use auth::{ClientCredentialsTokenSource, JwtTokenSource};
pub use cache::{CacheFacade, CacheTier};
pub use cache_index::CacheIndex;
pub use http::{RetryPolicy, TransportClient};
pub use lookup::ProviderLookup;
pub use object_store::ObjectStore;
pub use spotify::SpotifyLookup;
pub use tidal::TidalLookup;
