use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{PipelineError, PipelineResult};

/// Exclusive-ownership flag for one physical capture device.
///
/// Claims never block: a second claimant gets `DeviceBusy` immediately, so
/// the snapshot and stream endpoints cannot deadlock on the camera.
#[derive(Clone, Debug, Default)]
pub struct DeviceLock {
    held: Arc<AtomicBool>,
}

impl DeviceLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_claim(&self) -> PipelineResult<DeviceClaim> {
        self.held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| PipelineError::DeviceBusy)?;
        Ok(DeviceClaim {
            held: self.held.clone(),
        })
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }
}

/// Proof of device ownership. Dropping it releases the device.
#[derive(Debug)]
pub struct DeviceClaim {
    held: Arc<AtomicBool>,
}

impl Drop for DeviceClaim {
    fn drop(&mut self) {
        self.held.store(false, Ordering::Release);
    }
}
