//! The cell and face assembly loop.
//!
//! A [`MeshLoop`] visits the locally owned cells of a [`MeshView`](crate::mesh::MeshView).
//! For every cell, boundary face and interior face it fills [`LocalInfo`] records with degrees
//! of freedom and integration values, hands them to a user supplied [`LocalIntegrator`] and
//! passes the filled records on to an [`Assembler`], which scatters them into global storage.
//!
//! Every interior face is assembled exactly once per pass. Faces between two locally owned
//! cells are assembled when visiting the cell with the smaller [`CellId`](crate::mesh::CellId).
//! Faces between a locally owned cell and a ghost cell are handled according to
//! [`GhostFaces`].
mod assembler;
mod info;
mod meshloop;

pub use assembler::*;
pub use info::*;
pub use meshloop::*;
