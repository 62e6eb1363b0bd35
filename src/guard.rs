use crate::db_types::Call;
use crate::error::CallError;

use tracing::warn;

/// A record that belongs to exactly one business.
pub trait TenantOwned {
    const KIND: &'static str;

    fn owner(&self) -> &str;
}

impl TenantOwned for Call {
    const KIND: &'static str = "call";

    fn owner(&self) -> &str {
        &self.business_id
    }
}

/// The caller's business must own the resource.  Callers load the resource first, so a
/// missing one has already failed with `NotFound` before this runs.
pub fn authorize<R: TenantOwned>(business_id: &str, resource: &R) -> Result<(), CallError> {
    if resource.owner() == business_id {
        return Ok(());
    }
    warn!(
        business_id,
        owner = resource.owner(),
        kind = R::KIND,
        "cross-tenant access denied"
    );
    Err(CallError::Forbidden(R::KIND))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_is_allowed() {
        let call = Call::new("biz-1", "+15551234567").expect("call");
        assert!(authorize("biz-1", &call).is_ok());
    }

    #[test]
    fn other_tenant_is_forbidden() {
        let call = Call::new("biz-1", "+15551234567").expect("call");
        let err = authorize("biz-2", &call).expect_err("forbidden");
        assert!(matches!(err, CallError::Forbidden("call")));
    }

    #[test]
    fn comparison_is_exact() {
        let call = Call::new("biz-1", "+15551234567").expect("call");
        assert!(authorize("BIZ-1", &call).is_err());
        assert!(authorize("biz-1 ", &call).is_err());
    }
}
