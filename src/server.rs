use std::convert::Infallible;
use std::sync::Arc;

use anyhow::{Context, Result};
use html_escape::{encode_double_quoted_attribute, encode_text};
use tokio::net::TcpListener;
use tracing::info;
use warp::filters::path::Tail;
use warp::http::{HeaderValue, StatusCode, header};
use warp::reply::Response as WarpResponse;
use warp::Filter;

use crate::config::ServeConfig;
use crate::paths;
use crate::tree::{Asset, StaticTree};

const DEFAULT_DOCUMENT: &str = "index.html";
const NOT_FOUND_BODY: &str = "404 page not found\n";

pub async fn run_server(config: ServeConfig, tree: StaticTree) -> Result<()> {
    let listener = bind(&config).await?;
    serve(listener, tree).await
}

pub async fn bind(config: &ServeConfig) -> Result<TcpListener> {
    TcpListener::bind((config.bind, config.port))
        .await
        .with_context(|| format!("cannot listen on {}:{}", config.bind, config.port))
}

/// Serves `tree` on `listener` until the process is killed.
pub async fn serve(listener: TcpListener, tree: StaticTree) -> Result<()> {
    let listening_addr = listener.local_addr()?;
    let routes = routes(Arc::new(tree));
    info!("listening on {listening_addr}...");
    warp::serve(routes).incoming(listener).run().await;
    Ok(())
}

pub fn routes(
    tree: Arc<StaticTree>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    warp::get()
        .or(warp::head())
        .unify()
        .and(warp::path::tail())
        .and(warp::header::optional::<String>("if-none-match"))
        .and(warp::header::optional::<String>("range"))
        .and(with_tree(tree))
        .and_then(static_handler)
}

fn with_tree(
    tree: Arc<StaticTree>,
) -> impl Filter<Extract = (Arc<StaticTree>,), Error = Infallible> + Clone {
    warp::any().map(move || tree.clone())
}

#[derive(Debug)]
enum Resolved<'a> {
    File(&'a Asset),
    Listing(String),
    Redirect(String),
    NotFound,
}

fn resolve<'a>(tree: &'a StaticTree, tail: &str) -> Resolved<'a> {
    let Some(key) = paths::request_key(tail) else {
        return Resolved::NotFound;
    };

    if key.is_empty() || key.ends_with('/') {
        if let Some(asset) = tree.get(&format!("{key}{DEFAULT_DOCUMENT}")) {
            return Resolved::File(asset);
        }
        if tree.has_dir(&key) {
            return Resolved::Listing(key);
        }
        return Resolved::NotFound;
    }

    if let Some(asset) = tree.get(&key) {
        return Resolved::File(asset);
    }
    let dir = format!("{key}/");
    if tree.has_dir(&dir) {
        let encoded: Vec<_> = dir.split('/').map(urlencoding::encode).collect();
        return Resolved::Redirect(format!("/{}", encoded.join("/")));
    }
    Resolved::NotFound
}

async fn static_handler(
    tail: Tail,
    if_none_match: Option<String>,
    range: Option<String>,
    tree: Arc<StaticTree>,
) -> Result<WarpResponse, Infallible> {
    let response = match resolve(&tree, tail.as_str()) {
        Resolved::File(asset) => file_response(asset, if_none_match.as_deref(), range.as_deref()),
        Resolved::Listing(dir) => listing_response(&tree, &dir),
        Resolved::Redirect(location) => redirect_response(&location),
        Resolved::NotFound => plain_response(StatusCode::NOT_FOUND, NOT_FOUND_BODY),
    };
    Ok(response)
}

fn file_response(asset: &Asset, if_none_match: Option<&str>, range: Option<&str>) -> WarpResponse {
    if asset.is_cached_by(if_none_match) {
        let mut response = WarpResponse::new(Vec::<u8>::new().into());
        *response.status_mut() = StatusCode::NOT_MODIFIED;
        insert_file_headers(&mut response, asset);
        return response;
    }

    let total = asset.data().len() as u64;
    let byte_range = range
        .map(|value| parse_range(value, total))
        .unwrap_or(ByteRange::Full);

    match byte_range {
        ByteRange::Full => {
            let mut response = WarpResponse::new(asset.data().to_vec().into());
            insert_file_headers(&mut response, asset);
            response
        }
        ByteRange::Partial { start, end } => {
            let body = asset.data()[start as usize..=end as usize].to_vec();
            let mut response = WarpResponse::new(body.into());
            *response.status_mut() = StatusCode::PARTIAL_CONTENT;
            insert_file_headers(&mut response, asset);
            if let Ok(value) = HeaderValue::from_str(&format!("bytes {start}-{end}/{total}")) {
                response.headers_mut().insert(header::CONTENT_RANGE, value);
            }
            response
        }
        ByteRange::Unsatisfiable => {
            let mut response = plain_response(
                StatusCode::RANGE_NOT_SATISFIABLE,
                "invalid range: failed to overlap\n",
            );
            if let Ok(value) = HeaderValue::from_str(&format!("bytes */{total}")) {
                response.headers_mut().insert(header::CONTENT_RANGE, value);
            }
            response
        }
    }
}

fn insert_file_headers(response: &mut WarpResponse, asset: &Asset) {
    if let Ok(content_type) = HeaderValue::from_str(asset.content_type()) {
        response
            .headers_mut()
            .insert(header::CONTENT_TYPE, content_type);
    }
    if let Ok(etag) = HeaderValue::from_str(asset.etag()) {
        response.headers_mut().insert(header::ETAG, etag);
    }
    response
        .headers_mut()
        .insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
}

fn listing_response(tree: &StaticTree, dir: &str) -> WarpResponse {
    let mut body = String::from(
        "<!doctype html>\n<meta name=\"viewport\" content=\"width=device-width\">\n<pre>\n",
    );
    for name in tree.children(dir) {
        let href = match name.strip_suffix('/') {
            Some(stem) => format!("{}/", urlencoding::encode(stem)),
            None => urlencoding::encode(&name).into_owned(),
        };
        body.push_str(&format!(
            "<a href=\"{}\">{}</a>\n",
            encode_double_quoted_attribute(&href),
            encode_text(&name)
        ));
    }
    body.push_str("</pre>\n");

    let mut response = WarpResponse::new(body.into());
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    response
}

fn redirect_response(location: &str) -> WarpResponse {
    let mut response = WarpResponse::new(Vec::<u8>::new().into());
    *response.status_mut() = StatusCode::MOVED_PERMANENTLY;
    if let Ok(value) = HeaderValue::from_str(location) {
        response.headers_mut().insert(header::LOCATION, value);
    }
    response
}

fn plain_response(status: StatusCode, body: &str) -> WarpResponse {
    let mut response = WarpResponse::new(body.to_string().into());
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response.headers_mut().insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    response
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ByteRange {
    Full,
    Partial { start: u64, end: u64 },
    Unsatisfiable,
}

/// Interprets a single `bytes=` range against a body of `len` bytes.
/// Multi-range and malformed headers fall back to the full body.
fn parse_range(value: &str, len: u64) -> ByteRange {
    let Some(spec) = value.trim().strip_prefix("bytes=") else {
        return ByteRange::Full;
    };
    if spec.contains(',') {
        return ByteRange::Full;
    }
    let Some((start, end)) = spec.split_once('-') else {
        return ByteRange::Full;
    };
    let (start, end) = (start.trim(), end.trim());

    if start.is_empty() {
        let Ok(suffix) = end.parse::<u64>() else {
            return ByteRange::Full;
        };
        if suffix == 0 || len == 0 {
            return ByteRange::Unsatisfiable;
        }
        let suffix = suffix.min(len);
        return ByteRange::Partial {
            start: len - suffix,
            end: len - 1,
        };
    }

    let Ok(start) = start.parse::<u64>() else {
        return ByteRange::Full;
    };
    let end = if end.is_empty() {
        None
    } else {
        match end.parse::<u64>() {
            Ok(end) if end >= start => Some(end),
            _ => return ByteRange::Full,
        }
    };
    if start >= len {
        return ByteRange::Unsatisfiable;
    }
    ByteRange::Partial {
        start,
        end: end.map_or(len - 1, |end| end.min(len - 1)),
    }
}
