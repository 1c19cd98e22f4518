pub mod nefit_easy;
