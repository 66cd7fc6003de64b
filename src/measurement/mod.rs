//! Post-processing of captured measurement records.

pub mod metrics;

pub use metrics::{
    dbv_to_volts, dc_power, efficiency, gain_db, harmonic_power, ratio_db, rms_power,
    sideband_rejection, to_dbw, total_harmonic_distortion, total_harmonic_distortion_dbv,
    REFERENCE_IMPEDANCE_OHMS,
};
