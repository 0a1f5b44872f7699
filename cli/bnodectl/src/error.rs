//! Error handling and display for the CLI.

use colored::Colorize;

use bnode_lifecycle::LifecycleError;

/// Print an error in a user-friendly format.
pub fn print_error(err: &anyhow::Error) {
    eprintln!("{} {}", "Error:".red().bold(), err);

    // Check for specific error types and provide hints
    if let Some(lifecycle_err) = err.downcast_ref::<LifecycleError>() {
        match lifecycle_err {
            LifecycleError::Config(_) => {
                eprintln!(
                    "\n{}",
                    "Hint: Check the BNODE_* and provider credential environment variables."
                        .yellow()
                );
            }
            LifecycleError::Timeout { what, .. } => {
                eprintln!(
                    "\n{}",
                    format!(
                        "Hint: The node may still exist. Waiting for {what} hit its bound; \
                         inspect with `bnode list` and destroy if unwanted."
                    )
                    .yellow()
                );
            }
            LifecycleError::Step { step, .. } => {
                eprintln!(
                    "\n{}",
                    format!(
                        "Hint: Bootstrap stopped at `{step}`. The VM and DNS record were kept \
                         for diagnosis; SSH in or destroy the node."
                    )
                    .yellow()
                );
            }
            LifecycleError::Cancelled => {
                eprintln!(
                    "\n{}",
                    "Hint: Interrupted mid-lifecycle. Run `bnode list` to see what was left \
                     behind."
                        .yellow()
                );
            }
            LifecycleError::Provider { .. } => {}
        }
    }
}
