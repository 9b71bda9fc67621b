pub mod reentrancy;
pub mod tx_origin;

use self::{reentrancy::ReentrancyDetector, tx_origin::TxOriginDetector};
use super::oracle::Detector;

/// The fixed detector set run on every successful call
pub fn default_detectors() -> Vec<Box<dyn Detector>> {
    vec![Box::new(ReentrancyDetector::new()), Box::new(TxOriginDetector::new())]
}
