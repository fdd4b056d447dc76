pub mod certificate;
pub mod vasp;
