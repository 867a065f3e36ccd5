use http_retry::{HttpRetryClient, RequestOptions};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "https://example.com/".to_owned());

    let mut options = RequestOptions::default();
    options.retry.retries = 3;
    options.retry.min_timeout_ms = 200;
    options.validation.full_document = true;

    let client = HttpRetryClient::new().with_options(options)?;
    let result = client.get(&url).await;

    if let Some(status) = result.status() {
        println!("status: {status} after {} attempt(s)", result.attempts);
    }
    let response = result.into_result()?;
    println!("{} bytes from {}", response.body().len(), response.url());

    Ok(())
}
