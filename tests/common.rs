#![allow(dead_code)]

use authfetch::config::{extract, ConfigV1};
use authfetch::identity::{IdentityError, UserHandle};
use async_trait::async_trait;
use figment::{
    providers::{Format, Yaml},
    Figment,
};
use mockito::{Matcher, Mock, ServerGuard};

/// A user handle that always yields the same token.
#[derive(Debug)]
pub struct StaticUser {
    pub uid: String,
    pub token: String,
}

impl StaticUser {
    pub fn new(uid: &str, token: &str) -> Self {
        Self {
            uid: uid.to_string(),
            token: token.to_string(),
        }
    }
}

#[async_trait]
impl UserHandle for StaticUser {
    fn uid(&self) -> &str {
        &self.uid
    }

    async fn get_id_token(&self) -> Result<String, IdentityError> {
        Ok(self.token.clone())
    }
}

/// Configuration pointing both the API and the identity provider at `server`.
pub fn load_test_config(server: &ServerGuard, auth_enabled: bool) -> ConfigV1 {
    let yaml = format!(
        r#"
version: "1.0.0"
auth:
  enabled: {auth_enabled}
api:
  base_url: "{url}/api"
identity:
  type: firebase
  api_key: "test-key"
  auth_domain: "demo.firebaseapp.com"
  project_id: "demo"
  identity_url: "{url}"
  token_url: "{url}"
logging:
  level: "debug"
  format: "console"
"#,
        auth_enabled = auth_enabled,
        url = server.url()
    );

    extract(Figment::new().merge(Yaml::string(&yaml))).expect("Failed to parse test config YAML")
}

/// Mocks a successful password sign-in issuing `id_token`.
pub async fn mock_sign_in(server: &mut ServerGuard, id_token: &str) -> Mock {
    let body = format!(
        r#"{{"localId": "uid-1", "email": "ada@example.com", "idToken": "{}", "refreshToken": "refresh-1", "expiresIn": "3600"}}"#,
        id_token
    );
    server
        .mock("POST", "/v1/accounts:signInWithPassword")
        .match_query(Matcher::UrlEncoded("key".into(), "test-key".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(body)
        .create_async()
        .await
}
