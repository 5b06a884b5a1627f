pub mod logging;

pub use logging::{
    format_elapsed, init_log_file, log_claims_loaded, log_startup, print_final_stats,
    truncate_text,
};
