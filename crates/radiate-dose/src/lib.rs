//! # Radiate Dose
//!
//! 剂量计算引擎与剂量体积直方图 (DVH) 统计。

pub mod analytical;
pub mod dvh;
pub mod engine;
pub mod external;

pub use analytical::AnalyticalDoseEngine;
pub use dvh::Dvh;
pub use engine::{build_engine, validate_beams, BeamSetup, DoseEngine, DoseRequest};
pub use external::ExternalDoseEngine;
