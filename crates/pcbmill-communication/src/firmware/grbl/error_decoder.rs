//! Grbl alarm and error code descriptions

/// Describe a Grbl alarm code
pub fn decode_alarm(code: u32) -> String {
    match code {
        1 => "Hard limit hit; position lost, re-home the machine".to_string(),
        2 => "Soft limit: target exceeds machine travel".to_string(),
        3 => "Reset during motion; position may be lost".to_string(),
        4 => "Probe already triggered before the cycle started".to_string(),
        5 => "Probe did not make contact within the programmed travel".to_string(),
        6 => "Homing aborted by reset".to_string(),
        7 => "Homing aborted because the safety door opened".to_string(),
        8 => "Homing could not clear the limit switch on pull-off".to_string(),
        9 => "Homing could not find a limit switch".to_string(),
        10 => "Limit switch already engaged at homing start".to_string(),
        _ => format!("Unknown alarm code: {}", code),
    }
}

/// Describe a Grbl `error:` code
///
/// Only the codes a milling session commonly hits are named.
pub fn decode_error(code: u32) -> String {
    match code {
        1 => "Expected command letter".to_string(),
        2 => "Bad number format".to_string(),
        3 => "Invalid '$' statement".to_string(),
        8 => "'$' command only valid when Idle".to_string(),
        9 => "G-code locked out during alarm or jog".to_string(),
        15 => "Jog target exceeds machine travel".to_string(),
        16 => "Invalid jog command".to_string(),
        20 => "Unsupported G-code command".to_string(),
        22 => "Feed rate not set".to_string(),
        33 => "Invalid motion target".to_string(),
        _ => format!("Unknown error code: {}", code),
    }
}
