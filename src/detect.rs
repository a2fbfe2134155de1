// src/detect.rs
//
// =============================================================================
// FLOWBRIDGE: FORMAT AUTO-DETECTION
// =============================================================================
//
// Cheap, ordered heuristics over the raw bytes, used when the caller does
// not name the source platform. Kept deliberately dumb: no YAML parse, just
// signature and key probes.

use crate::platforms::Platform;

/// Guess the source platform of a descriptor.
///
/// Order matters:
/// 1. `PK` zip signature -> Coze.
/// 2. `flowMeta` + `flowData` (case-sensitive) -> iFlytek.
/// 3. `workflow` + `app` + `kind` -> Dify.
/// 4. Lowercased Coze probes (`workflow_id`, `export_format`, ...).
/// 5. Default to the hub.
pub fn detect_platform(bytes: &[u8]) -> Platform {
    if bytes.starts_with(b"PK") {
        return Platform::Coze;
    }

    let text = String::from_utf8_lossy(bytes);

    if text.contains("flowMeta") && text.contains("flowData") {
        return Platform::IFlytek;
    }

    if text.contains("workflow") && text.contains("app") && text.contains("kind") {
        return Platform::Dify;
    }

    let lowered = text.to_lowercase();
    let coze_probe = lowered.contains("workflow_id")
        || lowered.contains("workflowid")
        || lowered.contains("export_format")
        || lowered.contains("trigger_parameters")
        || (lowered.contains("schema:")
            && (lowered.contains("nodes:") || lowered.contains("edges:")));
    if coze_probe {
        return Platform::Coze;
    }

    log::debug!("no format probe matched; defaulting to {}", Platform::hub());
    Platform::hub()
}
