//! This is the documentation for **seqtrace**, a sequential ray tracing and aberration analysis engine for optical
//! systems made of lenses, mirrors, stops and coordinate breaks.
//!
//! An [`OpticalSystem`](system::OpticalSystem) is an ordered list of [`Surface`](surface::Surface)s together with a
//! source (wavelength) table and a field table. Rays are traced surface by surface by the
//! [`SequentialTracer`](tracer::SequentialTracer) and aimed through points of the aperture stop by the
//! [`PupilAimer`](aiming::PupilAimer). On top of this the crate provides
//!
//! - first-order (paraxial) data and Seidel aberration sums, including afocal systems ([`paraxial`]),
//! - transverse ray aberration fans and astigmatic best focus,
//! - optical path difference maps and Fraunhofer point spread functions ([`analyzers`]).
//!
//! The engine works on caller-owned, immutable systems. It never touches files or installs a logger; diagnostics
//! are emitted through the [`log`] facade.
#![allow(clippy::module_name_repetitions)]

pub mod aiming;
pub mod analyzers;
pub mod config;
pub mod distributions;
pub mod error;
pub mod frames;
pub mod paraxial;
pub mod ray;
pub mod refractive_index;
pub mod solvers;
pub mod surface;
pub mod system;
pub mod tracer;
pub mod utils;

pub use error::{TraceError, TraceResult};
pub use system::OpticalSystem;
