//! Cell and face assembly loops for finite element computations on distributed meshes.
//!
//! The central piece is [`assembly::MeshLoop`], which traverses the locally owned cells of a
//! mesh, invokes user supplied local operators on cells, boundary faces and interior faces,
//! and scatters the resulting dense local matrices and vectors into global storage through an
//! [`assembly::Assembler`]. Storage distributed over several ranks is completed by a
//! collective `finalize`.
use nalgebra::RealField;

pub mod assembly;
pub mod comm;
pub mod dofs;
pub mod element;
pub mod error;
pub mod integration;
pub mod mesh;
pub mod point;
pub mod quadrature;
pub mod sparse;

pub(crate) mod workspace;

#[cfg(feature = "proptest-support")]
pub mod proptest;

pub extern crate meshworker_quadrature;
pub extern crate nalgebra;
pub extern crate nalgebra_sparse;

/// The scalar type of a computation.
///
/// Used as a trait alias for the traits frequently needed by generic `meshworker` routines.
pub trait Real: RealField + Copy {}

impl<T: RealField + Copy> Real for T {}
