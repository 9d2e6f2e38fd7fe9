pub mod distribution;
pub mod hasher;
pub mod marketplace;
pub mod pipeline;
pub mod storage;
pub mod transport;
pub mod upload_state;
pub mod uploader;
