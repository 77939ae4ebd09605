/// Retries an idempotent async call with exponential backoff.
///
/// Commands that change remote state are never wrapped in this; a failed
/// launch or job submit is reported as-is.
#[macro_export]
macro_rules! retry_async {
    ($times:expr, $delay_ms:expr, $func:expr) => {{
        let mut attempts = 0;
        let mut delay: u64 = $delay_ms;

        loop {
            attempts += 1;
            let res = $func.await;

            if res.is_ok() || attempts >= $times {
                break res;
            }
            tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
            delay *= 2;
        }
    }};
}
