use const_format::concatcp;

mod container {
    pub(super) const KERBEROS: &str = "cn=krbContainer";
}

pub(crate) const ATTR_PRINCIPAL_NAME: &str = "krbPrincipalName";
pub(crate) const ATTR_ALLOWED_TO_DELEGATE_TO: &str = "krbAllowedToDelegateTo";
pub(crate) const RDN_PRINCIPAL: &str = concatcp!(ATTR_PRINCIPAL_NAME, "=");

/// DN of the entry holding `principal` (unqualified) in `realm`.
pub(crate) fn principal_dn(principal: &str, realm: &str, base_dn: &str) -> String {
    format!(
        "{RDN_PRINCIPAL}{qualified},cn={realm},{container},{base_dn}",
        qualified = qualified(principal, realm),
        container = container::KERBEROS
    )
}

/// `principal@REALM`, as passed to `kinit` and stored in delegation targets.
pub(crate) fn qualified(principal: &str, realm: &str) -> String {
    format!("{principal}@{realm}")
}
