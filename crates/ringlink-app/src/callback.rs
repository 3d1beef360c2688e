//! Callback URLs: building them on the identity holder side and checking
//! handoff callbacks on the consumer side.

use std::str::FromStr;

use url::{Url, form_urlencoded};

use crate::{
    error::ActionError,
    protocol::{CALLBACK_MODE, RequestId},
};

/// Query parameters that must never appear in a callback.
pub const SECRET_PARAMS: [&str; 3] = ["secret", "session_secret", "sessionSecret"];

/// Check that `callback` is an absolute URL with a scheme.
pub fn validate_callback(callback: &str) -> Result<(), ActionError> {
    match Url::parse(callback) {
        Ok(url) if !url.scheme().is_empty() => Ok(()),
        _ => Err(ActionError::InvalidCallback),
    }
}

/// Append `params` to the query of `callback`, joining with `?` or `&` as
/// needed. A `#fragment` stays at the end.
///
/// The callback text is kept as given; only the appended values are encoded.
pub fn append_query(callback: &str, params: &[(&str, &str)]) -> Result<String, ActionError> {
    validate_callback(callback)?;

    let encoded: String = form_urlencoded::Serializer::new(String::new()).extend_pairs(params).finish();
    if encoded.is_empty() {
        return Ok(callback.to_string());
    }

    let (base, fragment) = match callback.find('#') {
        Some(at) => callback.split_at(at),
        None => (callback, ""),
    };
    let separator = match base.find('?') {
        None => "?",
        Some(_) if base.ends_with('?') || base.ends_with('&') => "",
        Some(_) => "&",
    };
    Ok(format!("{base}{separator}{encoded}{fragment}"))
}

/// Handoff reference delivered to the consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandoffCallback {
    /// Identity that wrote the envelope
    pub owner_identity: String,
    /// Envelope reference
    pub request_id: RequestId,
}

impl HandoffCallback {
    /// Build the callback URL for this reference.
    pub fn to_url(&self, callback: &str) -> Result<String, ActionError> {
        let request_id = self.request_id.to_string();
        append_query(
            callback,
            &[("ownerIdentity", self.owner_identity.as_str()), ("request_id", request_id.as_str()), ("mode", CALLBACK_MODE)],
        )
    }

    /// Parse a handoff callback received by the consumer.
    ///
    /// Requires exactly one each of `ownerIdentity`, `request_id` and
    /// `mode=secure_handoff`; rejects any secret-bearing parameter. Other
    /// parameters belong to the consumer's own callback and are ignored.
    pub fn parse(received: &str) -> Result<Self, ActionError> {
        let url = Url::parse(received).map_err(|_| ActionError::InvalidCallback)?;
        let unexpected = |reason: &str| ActionError::UnexpectedCallback { reason: reason.to_string() };

        let mut owner = None;
        let mut request_id = None;
        let mut mode = None;
        for (key, value) in url.query_pairs() {
            if SECRET_PARAMS.contains(&&*key) {
                tracing::warn!(param = %key, "callback carries a secret parameter, rejecting");
                return Err(unexpected("secret parameter present"));
            }
            let slot = match &*key {
                "ownerIdentity" => &mut owner,
                "request_id" => &mut request_id,
                "mode" => &mut mode,
                _ => continue,
            };
            if slot.replace(value.into_owned()).is_some() {
                return Err(unexpected("duplicate parameter"));
            }
        }

        if mode.as_deref() != Some(CALLBACK_MODE) {
            return Err(unexpected("mode is not secure_handoff"));
        }
        let owner_identity = owner.ok_or_else(|| unexpected("missing ownerIdentity"))?;
        if owner_identity.len() != 64 || !owner_identity.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(unexpected("malformed ownerIdentity"));
        }
        let request_id = RequestId::from_str(&request_id.ok_or_else(|| unexpected("missing request_id"))?)?;

        Ok(Self { owner_identity: owner_identity.to_ascii_lowercase(), request_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner() -> String {
        "ab".repeat(32)
    }

    fn request_id() -> String {
        "cd".repeat(32)
    }

    #[test]
    fn appends_with_question_mark_or_ampersand() {
        assert_eq!(append_query("myapp://done", &[("a", "1")]).unwrap(), "myapp://done?a=1");
        assert_eq!(append_query("myapp://done?x=y", &[("a", "1")]).unwrap(), "myapp://done?x=y&a=1");
        assert_eq!(append_query("myapp://done?", &[("a", "1")]).unwrap(), "myapp://done?a=1");
        assert_eq!(append_query("myapp://done", &[("m", "a b&c")]).unwrap(), "myapp://done?m=a+b%26c");
    }

    #[test]
    fn fragment_stays_after_the_query() {
        assert_eq!(append_query("myapp://done#x", &[("a", "1")]).unwrap(), "myapp://done?a=1#x");
        assert_eq!(append_query("myapp://done?s=1#x?y", &[("a", "1")]).unwrap(), "myapp://done?s=1&a=1#x?y");

        let callback = HandoffCallback { owner_identity: owner(), request_id: request_id().parse().unwrap() };
        let url = callback.to_url("myapp://handoff#done").unwrap();
        assert!(url.ends_with("#done"));
        assert_eq!(HandoffCallback::parse(&url).unwrap(), callback);
    }

    #[test]
    fn rejects_relative_callbacks() {
        assert_eq!(append_query("/relative", &[("a", "1")]), Err(ActionError::InvalidCallback));
        assert_eq!(validate_callback("no scheme here"), Err(ActionError::InvalidCallback));
    }

    #[test]
    fn handoff_callback_round_trip() {
        let callback = HandoffCallback { owner_identity: owner(), request_id: request_id().parse().unwrap() };
        let url = callback.to_url("myapp://handoff?state=42").unwrap();

        assert_eq!(
            url,
            format!("myapp://handoff?state=42&ownerIdentity={}&request_id={}&mode=secure_handoff", owner(), request_id())
        );
        assert_eq!(HandoffCallback::parse(&url).unwrap(), callback);
    }

    #[test]
    fn rejects_secret_parameters() {
        for param in SECRET_PARAMS {
            let url = format!(
                "myapp://h?ownerIdentity={}&request_id={}&mode=secure_handoff&{param}=leak",
                owner(),
                request_id()
            );
            assert!(
                matches!(HandoffCallback::parse(&url), Err(ActionError::UnexpectedCallback { .. })),
                "{param} accepted"
            );
        }
    }

    #[test]
    fn rejects_other_shapes() {
        let base = format!("myapp://h?ownerIdentity={}&request_id={}", owner(), request_id());
        assert!(HandoffCallback::parse(&base).is_err());
        assert!(HandoffCallback::parse(&format!("{base}&mode=plain")).is_err());
        assert!(HandoffCallback::parse(&format!("{base}&mode=secure_handoff&request_id={}", request_id())).is_err());
        assert!(
            HandoffCallback::parse(&format!("myapp://h?ownerIdentity=short&request_id={}&mode=secure_handoff", request_id()))
                .is_err()
        );
    }
}
