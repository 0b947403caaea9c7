use std::time::Duration;

use delegation::policy::{LdapPolicyController, LdapSettings, PolicyController, PolicyError};

fn settings(url: String) -> LdapSettings {
    LdapSettings {
        url,
        bind_dn: "cn=admin,dc=example,dc=com".to_string(),
        bind_password: "admin".to_string(),
        base_dn: "dc=example,dc=com".to_string(),
        realm: "EXAMPLE.COM".to_string(),
        timeout: Duration::from_secs(2),
        confirm_attempts: 3,
        confirm_interval: Duration::from_millis(10),
    }
}

#[tokio::test]
async fn given_unreachable_directory_when_setting_delegation_then_write_is_rejected() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut policy = LdapPolicyController::new(settings(format!("ldap://{addr}")));
    for enabled in [true, false] {
        let err = policy
            .set_delegation("HTTP/www.example.com", "ldap/ldap.example.com", enabled)
            .await
            .unwrap_err();

        let PolicyError::WriteRejected { entry, reason } = err;
        assert_eq!(
            entry,
            "krbPrincipalName=HTTP/www.example.com@EXAMPLE.COM,cn=EXAMPLE.COM,cn=krbContainer,dc=example,dc=com"
        );
        assert!(!reason.is_empty());
    }
}
