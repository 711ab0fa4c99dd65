//! Guest side iSCSI scripts and session parsing.

use softlayer_client::NetworkStorage;
use softlayer_cpi_core::{Error, Result};

/// Lists iSCSI sessions as alternating target and attached device lines.
pub const SESSION_LISTING_COMMAND: &str = r#"sleep 1
iscsiadm -m session -P3 | sed -n "/Target:/s/Target: //p; /Attached scsi disk /{ s/Attached scsi disk //; s/State:.*//p}""#;

/// Target and device of one iSCSI session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// iSCSI qualified target name
    pub target: String,
    /// Kernel device name, e.g. `sdb`
    pub device: String,
}

/// Script configuring initiator credentials for `volume` and discovering its targets.
///
/// # Errors
///
/// Returns [`Error::ValidationError`] if the volume lacks credentials or a backend address.
pub fn attach_script(volume: &NetworkStorage) -> Result<String> {
    let (username, password, portal) = match (
        volume.username.as_deref(),
        volume.password.as_deref(),
        volume.service_resource_backend_ip_address.as_deref(),
    ) {
        (Some(username), Some(password), Some(portal)) => (username, password, portal),
        _ => {
            return Err(Error::ValidationError(format!(
                "Volume '{}' has no iSCSI credentials or target address",
                volume.id.unwrap_or_default()
            )))
        }
    };

    Ok(format!(
        r"export PATH=/etc/init.d:$PATH
cp /etc/iscsi/iscsid.conf{{,.save}}
sed '/^node.startup/s/^.*/node.startup = automatic/' -i /etc/iscsi/iscsid.conf
sed '/^#node.session.auth.authmethod/s/#//' -i /etc/iscsi/iscsid.conf
sed '/^#node.session.auth.username / {{s/#//; s/ username/ {username}/}}' -i /etc/iscsi/iscsid.conf
sed '/^#node.session.auth.password / {{s/#//; s/ password/ {password}/}}' -i /etc/iscsi/iscsid.conf
sed '/^#discovery.sendtargets.auth.username / {{s/#//; s/ username/ {username}/}}' -i /etc/iscsi/iscsid.conf
sed '/^#discovery.sendtargets.auth.password / {{s/#//; s/ password/ {password}/}}' -i /etc/iscsi/iscsid.conf
open-iscsi restart
rm -r /etc/iscsi/send_targets
open-iscsi stop
open-iscsi start
iscsiadm -m discovery -t sendtargets -p {portal}
open-iscsi restart"
    ))
}

/// Script logging out of `target` and removing its node record.
#[must_use]
pub fn detach_script(target: &str) -> String {
    format!("iscsiadm -m node -T {target} -u\niscsiadm -m node -o delete -T {target}")
}

/// Find the session of the volume owned by `username` in the output of
/// [`SESSION_LISTING_COMMAND`].
///
/// Target names carry the lower-cased volume username.
///
/// # Errors
///
/// Returns [`Error::DiskNotFound`] if no session matches.
pub fn find_session(output: &str, username: &str) -> Result<Session> {
    let needle = username.to_lowercase();
    let lines: Vec<&str> = output
        .trim_matches('\n')
        .lines()
        .map(|line| line.trim_matches(|c: char| c == '\t' || c == ' '))
        .collect();

    lines
        .chunks(2)
        .find(|pair| pair[0].contains(&needle))
        .and_then(|pair| match pair {
            [target, device] if !device.is_empty() => Some(Session {
                target: (*target).to_string(),
                device: (*device).to_string(),
            }),
            _ => None,
        })
        .ok_or_else(|| {
            Error::DiskNotFound(format!(
                "Can not find matched iSCSI device for user name: {username}"
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SESSIONS: &str = "\niqn.1992-08.com.netapp:stfdal0901\n\t\tsdb\t\t\n\
iqn.1992-08.com.netapp:sl02su1234567-v24680\n\t\tsdc\t\t\n";

    fn volume() -> NetworkStorage {
        NetworkStorage {
            id: Some(24_680),
            username: Some("SL02SU1234567-V24680".to_string()),
            password: Some("s3cret".to_string()),
            service_resource_backend_ip_address: Some("10.2.125.51".to_string()),
            ..NetworkStorage::default()
        }
    }

    #[test]
    fn test_find_session_matches_lowercased_username() {
        let session = find_session(SESSIONS, "SL02SU1234567-V24680").unwrap();
        assert_eq!(
            session,
            Session {
                target: "iqn.1992-08.com.netapp:sl02su1234567-v24680".to_string(),
                device: "sdc".to_string(),
            }
        );
    }

    #[test]
    fn test_find_session_missing() {
        let err = find_session(SESSIONS, "SL02SU7654321").unwrap_err();
        assert!(matches!(err, Error::DiskNotFound(_)));
        assert!(find_session("", "SL02SU1234567").is_err());
    }

    #[test]
    fn test_attach_script_carries_credentials() {
        let script = attach_script(&volume()).unwrap();
        assert!(script.contains("s/ username/ SL02SU1234567-V24680/"));
        assert!(script.contains("s/ password/ s3cret/"));
        assert!(script.contains("iscsiadm -m discovery -t sendtargets -p 10.2.125.51"));
        assert!(script.contains("cp /etc/iscsi/iscsid.conf{,.save}"));
    }

    #[test]
    fn test_attach_script_requires_credentials() {
        let volume = NetworkStorage {
            password: None,
            ..volume()
        };
        assert!(attach_script(&volume).is_err());
    }

    #[test]
    fn test_detach_script() {
        assert_eq!(
            detach_script("iqn.x:y"),
            "iscsiadm -m node -T iqn.x:y -u\niscsiadm -m node -o delete -T iqn.x:y"
        );
    }
}
