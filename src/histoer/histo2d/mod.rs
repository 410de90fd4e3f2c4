pub mod histogram2d;
