//! HTTP renderer: fetches pages from the live dynamic site.

use async_trait::async_trait;
use reqwest::{Client, header::HeaderName};
use tracing::debug;
use url::Url;

use crate::application::render::{RenderError, RenderRequest, RenderedPage, Renderer};
use crate::config::RenderSettings;

use super::error::InfraError;

pub struct HttpRenderer {
    client: Client,
    origin: Url,
    theme_header: HeaderName,
}

impl HttpRenderer {
    pub fn new(settings: &RenderSettings) -> Result<Self, InfraError> {
        let client = Client::builder()
            .user_agent(Self::user_agent())
            .build()
            .map_err(|err| InfraError::configuration(format!("http client: {err}")))?;
        let theme_header = HeaderName::from_bytes(settings.theme_header.as_bytes())
            .map_err(|err| {
                InfraError::configuration(format!(
                    "invalid render.theme_header `{}`: {err}",
                    settings.theme_header
                ))
            })?;

        Ok(Self {
            client,
            origin: with_trailing_slash(settings.origin.clone()),
            theme_header,
        })
    }

    pub fn user_agent() -> &'static str {
        concat!("staticpub/", env!("CARGO_PKG_VERSION"))
    }

    /// `origin + url`, or `base_url + url` when the request overrides the base.
    fn target(&self, request: &RenderRequest) -> Result<Url, RenderError> {
        let base = match request.overrides.base_url.as_deref() {
            Some(base_url) => Url::parse(base_url)
                .map(with_trailing_slash)
                .map_err(|err| {
                    RenderError::failed(&request.url, format!("invalid base url `{base_url}`: {err}"))
                })?,
            None => self.origin.clone(),
        };
        base.join(request.url.trim_start_matches('/'))
            .map_err(|err| RenderError::failed(&request.url, format!("invalid url: {err}")))
    }
}

fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

#[async_trait]
impl Renderer for HttpRenderer {
    async fn render(&self, request: &RenderRequest) -> Result<RenderedPage, RenderError> {
        let target = self.target(request)?;
        let mut call = self.client.get(target.clone());
        if let Some(theme) = request.overrides.theme.as_deref() {
            call = call.header(self.theme_header.clone(), theme);
        }

        let response = call
            .send()
            .await
            .map_err(|err| RenderError::failed(&request.url, err.to_string()))?;
        let status = response.status().as_u16();
        let content = response
            .bytes()
            .await
            .map_err(|err| RenderError::failed(&request.url, err.to_string()))?;

        debug!(
            target: "staticpub::render",
            url = %request.url,
            target_url = %target,
            status,
            bytes = content.len(),
            "Rendered page"
        );
        Ok(RenderedPage::new(status, content))
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;
    use crate::application::render::RenderOverrides;

    fn settings(origin: &str) -> RenderSettings {
        RenderSettings {
            origin: Url::parse(origin).unwrap(),
            theme_header: "x-staticpub-theme".to_string(),
        }
    }

    #[test]
    fn target_joins_origin_and_url() {
        let renderer = HttpRenderer::new(&settings("http://127.0.0.1:3000/site")).unwrap();
        let target = renderer.target(&RenderRequest::new("/about/")).unwrap();
        assert_eq!(target.as_str(), "http://127.0.0.1:3000/site/about/");
    }

    #[test]
    fn base_url_override_replaces_origin() {
        let renderer = HttpRenderer::new(&settings("http://127.0.0.1:3000/")).unwrap();
        let request = RenderRequest::new("/offers/").with_overrides(RenderOverrides {
            base_url: Some("http://shop.example.com/".to_string()),
            theme: None,
        });
        assert_eq!(
            renderer.target(&request).unwrap().as_str(),
            "http://shop.example.com/offers/"
        );
    }

    #[test]
    fn invalid_theme_header_is_a_configuration_error() {
        let mut bad = settings("http://127.0.0.1:3000/");
        bad.theme_header = "not a header".to_string();
        assert!(matches!(
            HttpRenderer::new(&bad),
            Err(InfraError::Configuration { .. })
        ));
    }

    #[tokio::test]
    async fn returns_status_and_body_and_forwards_theme() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let read = socket.read(&mut buf).await.unwrap();
            let request = String::from_utf8_lossy(&buf[..read]).to_string();
            socket
                .write_all(
                    b"HTTP/1.1 404 Not Found\r\ncontent-length: 4\r\nconnection: close\r\n\r\ngone",
                )
                .await
                .unwrap();
            request
        });

        let renderer = HttpRenderer::new(&settings(&format!("http://{addr}/"))).unwrap();
        let request = RenderRequest::new("/missing/").with_overrides(RenderOverrides {
            base_url: None,
            theme: Some("storefront".to_string()),
        });
        let page = renderer.render(&request).await.unwrap();

        assert_eq!(page.status, 404);
        assert_eq!(&page.content[..], b"gone");
        let raw = server.await.unwrap().to_ascii_lowercase();
        assert!(raw.starts_with("get /missing/ "));
        assert!(raw.contains("x-staticpub-theme: storefront"));
    }

    #[tokio::test]
    async fn transport_failure_is_a_render_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let renderer = HttpRenderer::new(&settings(&format!("http://{addr}/"))).unwrap();
        let err = renderer
            .render(&RenderRequest::new("/"))
            .await
            .expect_err("connection refused");
        assert!(matches!(err, RenderError::Failed { .. }));
        assert!(!err.is_fatal());
    }
}
