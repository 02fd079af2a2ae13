//! Shared API validation utilities.

use crate::api::error::ApiError;
use crate::state::{SessionHostStatus, SessionHostType, SessionHostsStartInfo};
use std::collections::HashSet;

/// Maximum number of deployment metadata entries.
pub const MAX_METADATA_ENTRIES: usize = 30;

/// Maximum length of a deployment metadata key, in characters.
pub const MAX_METADATA_KEY_LEN: usize = 50;

/// Maximum length of a deployment metadata value, in characters.
pub const MAX_METADATA_VALUE_LEN: usize = 100;

/// Maximum length of a session host id in a request path.
const MAX_SESSION_HOST_ID_LEN: usize = 128;

/// Validate a session host id taken from a request path.
///
/// Rules:
/// - Length: 1..=128 characters
/// - Allowed characters: alphanumeric, hyphen (-), underscore (_)
pub fn validate_session_host_id(id: &str) -> Result<(), ApiError> {
    if id.is_empty() {
        return Err(ApiError::BadRequest("session host id cannot be empty".into()));
    }
    if id.len() > MAX_SESSION_HOST_ID_LEN {
        return Err(ApiError::BadRequest(format!(
            "session host id too long: {} characters (max {})",
            id.len(),
            MAX_SESSION_HOST_ID_LEN
        )));
    }
    if let Some(c) = id
        .chars()
        .find(|c| !c.is_ascii_alphanumeric() && *c != '-' && *c != '_')
    {
        return Err(ApiError::BadRequest(format!(
            "session host id contains invalid character: '{}'",
            c
        )));
    }
    Ok(())
}

/// Validate the status of a goal state request. Only `Active` and
/// `Terminated` can be requested.
pub fn validate_goal_status(status: SessionHostStatus) -> Result<(), ApiError> {
    match status {
        SessionHostStatus::Active | SessionHostStatus::Terminated => Ok(()),
        other => Err(ApiError::BadRequest(format!(
            "goal state must be Active or Terminated, got {}",
            other
        ))),
    }
}

/// Validate deployment metadata bounds.
pub fn validate_deployment_metadata<'a>(
    metadata: impl ExactSizeIterator<Item = (&'a String, &'a String)>,
) -> Result<(), ApiError> {
    if metadata.len() > MAX_METADATA_ENTRIES {
        return Err(ApiError::BadRequest(format!(
            "deployment metadata has {} entries (max {})",
            metadata.len(),
            MAX_METADATA_ENTRIES
        )));
    }
    for (key, value) in metadata {
        if key.is_empty() {
            return Err(ApiError::BadRequest(
                "deployment metadata key cannot be empty".into(),
            ));
        }
        let key_len = key.chars().count();
        if key_len > MAX_METADATA_KEY_LEN {
            return Err(ApiError::BadRequest(format!(
                "deployment metadata key '{}' too long: {} characters (max {})",
                key, key_len, MAX_METADATA_KEY_LEN
            )));
        }
        let value_len = value.chars().count();
        if value_len > MAX_METADATA_VALUE_LEN {
            return Err(ApiError::BadRequest(format!(
                "deployment metadata value for '{}' too long: {} characters (max {})",
                key, value_len, MAX_METADATA_VALUE_LEN
            )));
        }
    }
    Ok(())
}

/// Validate an assignment document before it is bound to the VM.
pub fn validate_start_info(info: &SessionHostsStartInfo) -> Result<(), ApiError> {
    if info.assignment_parts().is_none() {
        return Err(ApiError::BadRequest(format!(
            "assignment id must be titleId:buildId:region, got '{}'",
            info.assignment_id
        )));
    }
    if info.count == 0 {
        return Err(ApiError::BadRequest("count must be at least 1".into()));
    }

    match info.session_host_type {
        SessionHostType::Container => match info.image_details.as_ref() {
            Some(image) if !image.image_name.is_empty() => {}
            _ => {
                return Err(ApiError::BadRequest(
                    "container assignment requires image details with an image name".into(),
                ))
            }
        },
        SessionHostType::Process => {
            let command = info.start_game_command.as_deref().unwrap_or_default();
            if command.trim().is_empty() {
                return Err(ApiError::BadRequest(
                    "process assignment requires a start game command".into(),
                ));
            }
        }
    }

    if !info.port_mappings_list.is_empty() && info.port_mappings_list.len() < info.count as usize {
        return Err(ApiError::BadRequest(format!(
            "port mappings cover {} instances, count is {}",
            info.port_mappings_list.len(),
            info.count
        )));
    }

    validate_deployment_metadata(info.deployment_metadata.iter())?;

    let mut mount_paths = HashSet::new();
    for asset in &info.asset_details {
        if asset.download_uri.is_empty() {
            return Err(ApiError::BadRequest("asset download uri cannot be empty".into()));
        }
        if asset.mount_path.is_empty() {
            return Err(ApiError::BadRequest(format!(
                "asset {} has no mount path",
                asset.download_uri
            )));
        }
        if !mount_paths.insert(asset.mount_path.as_str()) {
            return Err(ApiError::BadRequest(format!(
                "duplicate asset mount path: {}",
                asset.mount_path
            )));
        }
    }

    let mut certificate_names = HashSet::new();
    for cert in &info.game_certificates {
        if cert.name.is_empty() {
            return Err(ApiError::BadRequest("certificate name cannot be empty".into()));
        }
        if cert.pem_contents.is_none() && cert.pfx_contents.is_none() {
            return Err(ApiError::BadRequest(format!(
                "certificate {} has no contents",
                cert.name
            )));
        }
        if !certificate_names.insert(cert.name.as_str()) {
            return Err(ApiError::BadRequest(format!(
                "duplicate certificate name: {}",
                cert.name
            )));
        }
    }

    if info.session_host_max_state_duration_secs == Some(0) {
        return Err(ApiError::BadRequest(
            "session host max state duration must be > 0".into(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{AssetDetail, CertificateDetail, ContainerImageDetails};
    use std::collections::HashMap;

    fn process_start_info() -> SessionHostsStartInfo {
        serde_json::from_str(
            r#"{
                "assignmentId": "title1:build1:westus",
                "sessionHostType": "Process",
                "count": 2,
                "startGameCommand": "./server --port 7777"
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_validate_session_host_id() {
        let valid = ["abc", "0f1e2d3c-aaaa-bbbb-cccc-0123456789ab", "host_1"];
        for id in valid {
            assert!(validate_session_host_id(id).is_ok(), "expected '{}' to be valid", id);
        }

        let invalid = [
            ("", "empty"),
            ("a/b", "slash"),
            ("../etc", "path traversal"),
            ("a b", "space"),
        ];
        for (id, desc) in invalid {
            assert!(
                validate_session_host_id(id).is_err(),
                "expected '{}' ({}) to be invalid",
                id,
                desc
            );
        }
        assert!(validate_session_host_id(&"a".repeat(129)).is_err());
    }

    #[test]
    fn test_validate_goal_status() {
        assert!(validate_goal_status(SessionHostStatus::Active).is_ok());
        assert!(validate_goal_status(SessionHostStatus::Terminated).is_ok());
        assert!(validate_goal_status(SessionHostStatus::StandingBy).is_err());
    }

    #[test]
    fn test_metadata_bounds() {
        let at_limit: HashMap<String, String> = (0..MAX_METADATA_ENTRIES)
            .map(|i| (format!("k{}", i), "v".to_string()))
            .collect();
        assert!(validate_deployment_metadata(at_limit.iter()).is_ok());

        let mut over = at_limit.clone();
        over.insert("one-more".into(), "v".into());
        assert!(validate_deployment_metadata(over.iter()).is_err());

        // Limits count characters, not bytes
        let cases = [
            ("k".repeat(50), "v".to_string(), true),
            ("k".repeat(51), "v".to_string(), false),
            ("k".to_string(), "v".repeat(100), true),
            ("k".to_string(), "v".repeat(101), false),
            ("k".to_string(), "é".repeat(100), true),
            (String::new(), "v".to_string(), false),
        ];
        for (key, value, ok) in cases {
            let metadata = HashMap::from([(key.clone(), value)]);
            assert_eq!(
                validate_deployment_metadata(metadata.iter()).is_ok(),
                ok,
                "key len {}",
                key.len()
            );
        }
    }

    #[test]
    fn test_validate_start_info() {
        assert!(validate_start_info(&process_start_info()).is_ok());

        let base = process_start_info();
        let invalid = [
            (
                SessionHostsStartInfo {
                    assignment_id: "title1:build1".into(),
                    ..base.clone()
                },
                "two-part assignment id",
            ),
            (
                SessionHostsStartInfo {
                    count: 0,
                    ..base.clone()
                },
                "zero count",
            ),
            (
                SessionHostsStartInfo {
                    start_game_command: None,
                    ..base.clone()
                },
                "process without command",
            ),
            (
                SessionHostsStartInfo {
                    session_host_type: SessionHostType::Container,
                    ..base.clone()
                },
                "container without image",
            ),
            (
                SessionHostsStartInfo {
                    port_mappings_list: vec![Vec::new()],
                    ..base.clone()
                },
                "too few port mapping lists",
            ),
            (
                SessionHostsStartInfo {
                    asset_details: vec![
                        AssetDetail {
                            mount_path: "/data".into(),
                            download_uri: "https://x/a.zip".into(),
                            sas_token: None,
                        },
                        AssetDetail {
                            mount_path: "/data".into(),
                            download_uri: "https://x/b.zip".into(),
                            sas_token: None,
                        },
                    ],
                    ..base.clone()
                },
                "duplicate mount path",
            ),
            (
                SessionHostsStartInfo {
                    game_certificates: vec![CertificateDetail {
                        name: "tls".into(),
                        thumbprint: "AB".into(),
                        pfx_contents: None,
                        pem_contents: None,
                        password: None,
                    }],
                    ..base.clone()
                },
                "certificate without contents",
            ),
            (
                SessionHostsStartInfo {
                    session_host_max_state_duration_secs: Some(0),
                    ..base.clone()
                },
                "zero max state duration",
            ),
        ];
        for (info, desc) in invalid {
            assert!(
                matches!(validate_start_info(&info), Err(ApiError::BadRequest(_))),
                "expected {} to be rejected",
                desc
            );
        }

        let container = SessionHostsStartInfo {
            session_host_type: SessionHostType::Container,
            start_game_command: None,
            image_details: Some(ContainerImageDetails {
                registry: String::new(),
                image_name: "game/server".into(),
                image_tag: "1.0".into(),
                username: None,
                password: None,
            }),
            ..base
        };
        assert!(validate_start_info(&container).is_ok());
    }
}
