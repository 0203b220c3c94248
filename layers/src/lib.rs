//! Protocol Stack Layers Library
//!
//! This crate implements the downlink physical layer of the 5G NR UE:
//! DCI resource allocation decoding and the real-time subframe worker pipeline.

pub mod phy;

use phy::pool::PoolError;
use phy::ra_dl::RaError;
use thiserror::Error;

/// Common errors for protocol layers
#[derive(Error, Debug)]
pub enum LayerError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Processing error: {0}")]
    ProcessingError(String),

    #[error("Component carrier {0} is not configured")]
    CarrierNotConfigured(u32),

    #[error(transparent)]
    Allocation(#[from] RaError),

    #[error(transparent)]
    Pool(#[from] PoolError),
}
