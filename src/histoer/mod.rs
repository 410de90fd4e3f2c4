pub mod cuts;
pub mod histo1d;
pub mod histo2d;
