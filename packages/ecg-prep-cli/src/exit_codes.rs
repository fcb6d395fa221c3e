/// Process exit codes
pub const SUCCESS: i32 = 0;
/// Bad configuration or missing input
pub const INPUT_ERROR: i32 = 1;
/// A step failed while running
pub const EXECUTION_ERROR: i32 = 2;
/// All steps finished but some recordings were skipped
pub const PARTIAL_FAILURE: i32 = 3;
