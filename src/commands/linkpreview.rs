//! OpenGraph lookup for `sendlink`.

use anyhow::Context;
use regex::Regex;
use reqwest::{Client, Url};
use std::io::Cursor;
use std::time::Duration;

pub const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

pub fn http_client() -> Client {
    Client::builder()
        .timeout(FETCH_TIMEOUT)
        .connect_timeout(FETCH_TIMEOUT)
        .user_agent(concat!("waclaw/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|_| Client::new())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpenGraph {
    pub title: Option<String>,
    pub description: Option<String>,
    /// Absolute image URL.
    pub image: Option<String>,
}

impl OpenGraph {
    /// A rich preview needs all three fields.
    pub fn is_complete(&self) -> bool {
        [&self.title, &self.description, &self.image]
            .iter()
            .all(|field| field.as_deref().is_some_and(|v| !v.is_empty()))
    }
}

/// Extract `og:title`, `og:description` and `og:image` from a page.
///
/// Attribute order and quoting vary between sites, so each `<meta>` tag is
/// matched whole and its attributes read separately. The first occurrence of
/// each property wins.
pub fn parse_open_graph(html: &str, page: &Url) -> anyhow::Result<OpenGraph> {
    let meta_regex = Regex::new(r"(?is)<meta\s[^>]*>")?;
    let attr_regex = Regex::new(r#"(?is)([a-z_:-]+)\s*=\s*(?:"([^"]*)"|'([^']*)')"#)?;

    let mut graph = OpenGraph::default();
    for tag in meta_regex.find_iter(html) {
        let mut property = None;
        let mut content = None;
        for attr in attr_regex.captures_iter(tag.as_str()) {
            let value = attr.get(2).or_else(|| attr.get(3)).map_or("", |m| m.as_str());
            match attr[1].to_ascii_lowercase().as_str() {
                "property" | "name" => property = Some(value.to_ascii_lowercase()),
                "content" => content = Some(decode_entities(value.trim())),
                _ => {}
            }
        }
        let (Some(property), Some(content)) = (property, content) else {
            continue;
        };
        let slot = match property.as_str() {
            "og:title" => &mut graph.title,
            "og:description" => &mut graph.description,
            "og:image" | "og:image:url" => &mut graph.image,
            _ => continue,
        };
        if slot.is_none() {
            *slot = Some(content);
        }
    }

    if let Some(image) = graph.image.take() {
        graph.image = page.join(&image).ok().map(String::from);
    }
    Ok(graph)
}

fn decode_entities(raw: &str) -> String {
    raw.replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

pub async fn fetch_open_graph(client: &Client, url: &str) -> anyhow::Result<OpenGraph> {
    let page = Url::parse(url).with_context(|| format!("Invalid URL {url:?}"))?;
    let response = client
        .get(page.clone())
        .send()
        .await
        .context("Failed to fetch page")?
        .error_for_status()?;
    let html = response.text().await.context("Failed to read page body")?;
    parse_open_graph(&html, &page)
}

/// Download a preview image. Anything but a 200 is an error.
pub async fn fetch_image(client: &Client, url: &str) -> anyhow::Result<Vec<u8>> {
    let response = client
        .get(url)
        .send()
        .await
        .context("Could not fetch thumbnail data")?;
    if response.status() != reqwest::StatusCode::OK {
        anyhow::bail!("Could not fetch thumbnail data: HTTP {}", response.status());
    }
    let bytes = response
        .bytes()
        .await
        .context("Could not read thumbnail data")?;
    Ok(bytes.to_vec())
}

/// Width and height from the image header, without decoding pixels.
pub fn image_dimensions(bytes: &[u8]) -> anyhow::Result<(u32, u32)> {
    image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .context("Could not read image header")?
        .into_dimensions()
        .context("Could not decode image config")
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PAGE: &str = r#"<html><head>
        <meta property="og:title" content="Rust &amp; Friends">
        <meta content='A page about crabs' name="og:description" />
        <meta property="og:image" content="/img/crab.png">
        <meta property="og:title" content="Second title">
    </head></html>"#;

    fn small_png() -> Vec<u8> {
        let mut out = Vec::new();
        image::RgbImage::new(3, 2)
            .write_to(&mut Cursor::new(&mut out), image::ImageFormat::Png)
            .unwrap();
        out
    }

    #[test]
    fn parses_properties_in_any_attribute_order() {
        let page = Url::parse("https://example.com/articles/1").unwrap();
        let graph = parse_open_graph(PAGE, &page).unwrap();
        assert_eq!(graph.title.as_deref(), Some("Rust & Friends"));
        assert_eq!(graph.description.as_deref(), Some("A page about crabs"));
        assert_eq!(graph.image.as_deref(), Some("https://example.com/img/crab.png"));
        assert!(graph.is_complete());
    }

    #[test]
    fn missing_image_is_incomplete() {
        let page = Url::parse("https://example.com/").unwrap();
        let graph =
            parse_open_graph(r#"<meta property="og:title" content="Only a title">"#, &page).unwrap();
        assert!(!graph.is_complete());
    }

    #[test]
    fn reads_dimensions_from_header() {
        assert_eq!(image_dimensions(&small_png()).unwrap(), (3, 2));
        assert!(image_dimensions(b"not an image").is_err());
    }

    #[tokio::test]
    async fn fetches_page_and_image() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/post"))
            .respond_with(ResponseTemplate::new(200).set_body_string(PAGE))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/img/crab.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(small_png()))
            .mount(&server)
            .await;

        let client = http_client();
        let graph = fetch_open_graph(&client, &format!("{}/post", server.uri()))
            .await
            .unwrap();
        let image_url = graph.image.clone().unwrap();
        assert_eq!(image_url, format!("{}/img/crab.png", server.uri()));

        let bytes = fetch_image(&client, &image_url).await.unwrap();
        assert_eq!(image_dimensions(&bytes).unwrap(), (3, 2));
    }

    #[tokio::test]
    async fn image_fetch_rejects_non_ok_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        let err = fetch_image(&http_client(), &format!("{}/missing.png", server.uri()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("404"));
    }
}
