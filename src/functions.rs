//! Display labels for device function ids
//!
//! The device owns the meaning of each id, so labels only carry the number.

use crate::model::{FunctionId, UNASSIGNED};

/// Display label for a function id
pub fn label(id: FunctionId) -> String {
    if id == UNASSIGNED {
        "Unassigned".to_string()
    } else {
        format!("Function {}", id)
    }
}
