pub mod caching;
pub mod psd_api;
pub mod util;

pub use caching::CachingPsdProvider;
pub use psd_api::PsdApiProvider;
