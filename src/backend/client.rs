use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::backend::api_types::{
  decode_record, ApiAuthResponse, ApiError, ApiListResponse, ApiPasswordAuth, ApiRegister,
};
use crate::backend::filter::{Filter, ListQuery};
use crate::backend::store::{IdentityProvider, RecordStore};
use crate::backend::types::{Session, User};
use crate::config::Config;
use crate::error::{SyncError, SyncResult};

/// Page size used when walking a full list
const PAGE_SIZE: u64 = 500;

/// PocketBase REST client
#[derive(Clone)]
pub struct PocketBaseClient {
  http: reqwest::Client,
  base: Url,
  users_collection: String,
}

impl PocketBaseClient {
  pub fn new(config: &Config) -> color_eyre::Result<Self> {
    let mut base = Url::parse(&config.backend.url)
      .map_err(|e| color_eyre::eyre::eyre!("Invalid backend url {}: {}", config.backend.url, e))?;
    // Url::join drops the last segment unless the path ends with '/'
    if !base.path().ends_with('/') {
      let path = format!("{}/", base.path());
      base.set_path(&path);
    }

    let http = reqwest::Client::builder()
      .user_agent(concat!("duet/", env!("CARGO_PKG_VERSION")))
      .timeout(std::time::Duration::from_secs(config.backend.timeout_secs))
      .build()
      .map_err(|e| color_eyre::eyre::eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      base,
      users_collection: config.backend.users_collection.clone(),
    })
  }

  fn records_url(&self, collection: &str, id: Option<&str>) -> SyncResult<Url> {
    let path = match id {
      Some(id) => format!("api/collections/{}/records/{}", collection, id),
      None => format!("api/collections/{}/records", collection),
    };
    self
      .base
      .join(&path)
      .map_err(|e| SyncError::remote(format!("invalid url for {}: {}", collection, e)))
  }

  fn request(&self, method: Method, url: Url, auth: Option<&Session>) -> RequestBuilder {
    let builder = self.http.request(method, url);
    match auth {
      Some(session) => builder.header(reqwest::header::AUTHORIZATION, &session.token),
      None => builder,
    }
  }

  async fn send<B: Serialize + ?Sized>(
    &self,
    collection: &str,
    builder: RequestBuilder,
    body: Option<&B>,
  ) -> SyncResult<Response> {
    let builder = match body {
      Some(body) => builder.json(body),
      None => builder,
    };
    let response = builder.send().await?;
    let status = response.status();
    if status.is_success() {
      return Ok(response);
    }
    if status == StatusCode::NOT_FOUND {
      return Err(SyncError::not_found(collection));
    }
    if status == StatusCode::UNAUTHORIZED {
      return Err(SyncError::NotAuthenticated);
    }

    let message = match response.json::<ApiError>().await {
      Ok(err) => err.summary(),
      Err(_) => status
        .canonical_reason()
        .unwrap_or("unexpected status")
        .to_string(),
    };
    Err(SyncError::Remote {
      status: Some(status.as_u16()),
      message,
    })
  }

  async fn json<T: serde::de::DeserializeOwned>(collection: &str, response: Response) -> SyncResult<T> {
    response
      .json::<T>()
      .await
      .map_err(|e| SyncError::decode(collection, e))
  }

  async fn list_page(
    &self,
    auth: &Session,
    collection: &str,
    query: &ListQuery,
    page: u64,
    per_page: u64,
    skip_total: bool,
  ) -> SyncResult<ApiListResponse> {
    let mut url = self.records_url(collection, None)?;
    {
      let mut params = url.query_pairs_mut();
      params.append_pair("page", &page.to_string());
      params.append_pair("perPage", &per_page.to_string());
      if skip_total {
        params.append_pair("skipTotal", "1");
      }
      if let Some(filter) = &query.filter {
        params.append_pair("filter", &filter.to_string());
      }
      if let Some(sort) = query.sort_param() {
        params.append_pair("sort", &sort);
      }
    }

    let response = self
      .send::<()>(collection, self.request(Method::GET, url, Some(auth)), None)
      .await?;
    Self::json(collection, response).await
  }

  async fn auth_with_password(&self, email: &str, password: &str) -> SyncResult<Session> {
    let url = self
      .base
      .join(&format!(
        "api/collections/{}/auth-with-password",
        self.users_collection
      ))
      .map_err(|e| SyncError::remote(e.to_string()))?;

    let body = ApiPasswordAuth {
      identity: email,
      password,
    };
    let response = self
      .send(
        &self.users_collection,
        self.request(Method::POST, url, None),
        Some(&body),
      )
      .await?;
    let auth: ApiAuthResponse = Self::json(&self.users_collection, response).await?;
    let user: User = decode_record(&self.users_collection, auth.record)?;

    debug!(user = %user.id, "authenticated");
    Ok(Session {
      token: auth.token,
      user,
    })
  }
}

#[async_trait]
impl RecordStore for PocketBaseClient {
  async fn list(&self, auth: &Session, collection: &str, query: &ListQuery) -> SyncResult<Vec<Value>> {
    let mut all_records = Vec::new();
    let mut page = 1u64;

    loop {
      let response = self
        .list_page(auth, collection, query, page, PAGE_SIZE, false)
        .await?;
      let count = response.items.len() as u64;
      all_records.extend(response.items);

      // Check if we've fetched every page
      if count < PAGE_SIZE || response.page >= response.total_pages {
        break;
      }
      page += 1;
    }

    debug!(collection, count = all_records.len(), "listed records");
    Ok(all_records)
  }

  async fn get_one(&self, auth: &Session, collection: &str, id: &str) -> SyncResult<Value> {
    let url = self.records_url(collection, Some(id))?;
    let response = self
      .send::<()>(collection, self.request(Method::GET, url, Some(auth)), None)
      .await?;
    Self::json(collection, response).await
  }

  async fn get_first(&self, auth: &Session, collection: &str, filter: &Filter) -> SyncResult<Value> {
    let query = ListQuery::filtered(filter.clone());
    let response = self.list_page(auth, collection, &query, 1, 1, true).await?;
    response
      .items
      .into_iter()
      .next()
      .ok_or_else(|| SyncError::not_found(collection))
  }

  async fn create(&self, auth: &Session, collection: &str, body: Value) -> SyncResult<Value> {
    let url = self.records_url(collection, None)?;
    let response = self
      .send(collection, self.request(Method::POST, url, Some(auth)), Some(&body))
      .await?;
    Self::json(collection, response).await
  }

  async fn update(&self, auth: &Session, collection: &str, id: &str, body: Value) -> SyncResult<Value> {
    let url = self.records_url(collection, Some(id))?;
    let response = self
      .send(collection, self.request(Method::PATCH, url, Some(auth)), Some(&body))
      .await?;
    Self::json(collection, response).await
  }

  async fn delete(&self, auth: &Session, collection: &str, id: &str) -> SyncResult<()> {
    let url = self.records_url(collection, Some(id))?;
    self
      .send::<()>(collection, self.request(Method::DELETE, url, Some(auth)), None)
      .await?;
    Ok(())
  }
}

#[async_trait]
impl IdentityProvider for PocketBaseClient {
  async fn login(&self, email: &str, password: &str) -> SyncResult<Session> {
    if email.trim().is_empty() || password.is_empty() {
      return Err(SyncError::Validation(
        "email and password are required".to_string(),
      ));
    }
    self.auth_with_password(email.trim(), password).await
  }

  async fn register(&self, email: &str, password: &str, confirmation: &str) -> SyncResult<Session> {
    let email = email.trim();
    if email.is_empty() || password.is_empty() {
      return Err(SyncError::Validation(
        "email and password are required".to_string(),
      ));
    }
    if password != confirmation {
      return Err(SyncError::Validation(
        "password confirmation does not match".to_string(),
      ));
    }

    let url = self.records_url(&self.users_collection, None)?;
    let body = ApiRegister {
      email,
      password,
      password_confirm: confirmation,
    };
    self
      .send(
        &self.users_collection,
        self.request(Method::POST, url, None),
        Some(&body),
      )
      .await?;

    self.auth_with_password(email, password).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn client(url: &str) -> PocketBaseClient {
    let config: Config = serde_yaml::from_str(&format!("backend:\n  url: {}\n", url)).unwrap();
    PocketBaseClient::new(&config).unwrap()
  }

  #[test]
  fn test_records_url_without_trailing_slash() {
    let c = client("https://pb.example.com/base");
    let url = c.records_url("tasks", Some("abc")).unwrap();
    assert_eq!(
      url.as_str(),
      "https://pb.example.com/base/api/collections/tasks/records/abc"
    );
  }

  #[test]
  fn test_records_url_root() {
    let c = client("http://127.0.0.1:8090");
    let url = c.records_url("partnerships", None).unwrap();
    assert_eq!(
      url.as_str(),
      "http://127.0.0.1:8090/api/collections/partnerships/records"
    );
  }

  #[tokio::test]
  async fn test_register_rejects_mismatched_confirmation() {
    let c = client("http://127.0.0.1:1");
    let err = c.register("a@example.com", "secret1", "secret2").await.unwrap_err();
    assert!(matches!(err, SyncError::Validation(_)));
  }

  #[tokio::test]
  async fn test_login_requires_credentials() {
    let c = client("http://127.0.0.1:1");
    let err = c.login("  ", "pw").await.unwrap_err();
    assert!(matches!(err, SyncError::Validation(_)));
  }
}
