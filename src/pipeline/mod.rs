pub mod retry;
pub mod diagnostic; // Run diagnostic dump (LEGALLENS_DUMP_DIR)
pub mod extraction;
pub mod structuring;
pub mod batch;
