//! Resolves episode descriptors from supported streaming sites into direct
//! stream links, getting past bot challenges, packed players, signed API
//! tokens and encrypted subtitles on the way.

pub mod config;
pub mod error;
pub mod http;
pub mod providers;
pub mod quality;
pub mod session;
pub mod subtitle;
pub mod token;
pub mod types;
pub mod unpack;
