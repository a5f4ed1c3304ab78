use crate::cache::ResponseCache;
use crate::config::GeneratorConfig;
use anyhow::Context;
use serde_json::json;
use std::fmt;
use std::io::{Read, Write};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Timeout for the cheap reachability probes run at construction.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Name of the local generation executable.
const LOCAL_EXECUTABLE: &str = "ollama";

/// Errors surfaced by the gateway.
#[derive(Debug)]
pub enum GatewayError {
    /// Neither the HTTP endpoint nor the local executable is reachable.
    /// Raised at construction; the pipeline cannot run without a transport.
    Unavailable,
    /// All retry attempts against the model were exhausted; carries the
    /// last transport error.
    Generation(String),
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            GatewayError::Unavailable => write!(
                f,
                "no generation transport reachable; ensure the model service is running or the '{LOCAL_EXECUTABLE}' executable is installed"
            ),
            GatewayError::Generation(detail) => {
                write!(f, "generation failed after retries: {detail}")
            }
        }
    }
}

impl std::error::Error for GatewayError {}

/// The generation seam the rest of the crate is written against. Blocking by
/// design: callers in async contexts dispatch through `spawn_blocking`.
pub trait TextGenerator: Send + Sync {
    /// Produces text for `prompt`, optionally overriding the configured
    /// model identifier.
    fn generate(&self, prompt: &str, model_override: Option<&str>) -> Result<String, GatewayError>;
}

/// Abstracts over the two ways of reaching a text-generation model: an HTTP
/// endpoint and a local command-line invocation. Owns the retry policy and
/// consults the [`ResponseCache`] before any transport call.
pub struct ModelGateway {
    model_name: String,
    generate_url: String,
    http_available: bool,
    cli_available: bool,
    max_retries: usize,
    retry_delay: Duration,
    cli_timeout: Duration,
    temperature: f64,
    cache: ResponseCache,
    client: Option<reqwest::blocking::Client>,
}

impl ModelGateway {
    /// Probes both transports and fails with [`GatewayError::Unavailable`]
    /// when neither is reachable. The HTTP transport is preferred when both
    /// are.
    pub fn new(config: &GeneratorConfig) -> Result<Self, GatewayError> {
        let client = match reqwest::blocking::Client::builder()
            .timeout(config.http_timeout())
            .build()
        {
            Ok(client) => Some(client),
            Err(e) => {
                warn!(error = %e, "failed to build HTTP client");
                None
            }
        };

        let http_available = client
            .as_ref()
            .map(|c| probe_http(c, &config.tags_url()))
            .unwrap_or(false);
        let cli_available = probe_cli();

        if !http_available && !cli_available {
            return Err(GatewayError::Unavailable);
        }

        info!(
            transport = if http_available { "http" } else { "cli" },
            model = %config.model_name,
            "model gateway ready"
        );

        Ok(Self {
            model_name: config.model_name.clone(),
            generate_url: config.generate_url(),
            http_available,
            cli_available,
            max_retries: config.max_retries,
            retry_delay: config.retry_delay(),
            cli_timeout: config.cli_timeout(),
            temperature: config.temperature,
            cache: ResponseCache::new(
                &config.cache_dir,
                config.cache_enabled,
                config.cache_max_age(),
            ),
            client,
        })
    }

    fn generate_once(&self, prompt: &str, model: &str) -> anyhow::Result<String> {
        if self.http_available {
            self.generate_http(prompt, model)
        } else {
            self.generate_cli(prompt, model)
        }
    }

    fn generate_http(&self, prompt: &str, model: &str) -> anyhow::Result<String> {
        let client = self
            .client
            .as_ref()
            .context("HTTP client not constructed")?;

        let payload = json!({
            "model": model,
            "prompt": prompt,
            "stream": false,
            "temperature": self.temperature,
        });

        let started = Instant::now();
        let response = client
            .post(&self.generate_url)
            .json(&payload)
            .send()
            .context("request to generation endpoint failed")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("generation endpoint returned {status}");
        }

        let body: serde_json::Value = response
            .json()
            .context("generation endpoint returned unparseable JSON")?;
        let text = body
            .get("response")
            .and_then(|v| v.as_str())
            .context("generation response is missing the `response` field")?
            .to_string();

        debug!(elapsed = ?started.elapsed(), "generated via HTTP");
        Ok(text)
    }

    fn generate_cli(&self, prompt: &str, model: &str) -> anyhow::Result<String> {
        // The prompt goes through a scoped temporary file: dropping the
        // handle removes the file on every exit path.
        let mut prompt_file =
            tempfile::NamedTempFile::new().context("failed to create prompt file")?;
        prompt_file
            .write_all(prompt.as_bytes())
            .context("failed to write prompt file")?;
        prompt_file.flush().context("failed to flush prompt file")?;

        let started = Instant::now();
        let mut command = Command::new(LOCAL_EXECUTABLE);
        command
            .arg("run")
            .arg(model)
            .arg("--temperature")
            .arg(self.temperature.to_string())
            .arg("-f")
            .arg(prompt_file.path());

        let output = run_with_timeout(command, self.cli_timeout)
            .with_context(|| format!("'{LOCAL_EXECUTABLE} run' invocation failed"))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("'{LOCAL_EXECUTABLE} run' failed: {}", stderr.trim());
        }

        debug!(elapsed = ?started.elapsed(), "generated via CLI");
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

impl TextGenerator for ModelGateway {
    fn generate(&self, prompt: &str, model_override: Option<&str>) -> Result<String, GatewayError> {
        let model = model_override.unwrap_or(&self.model_name);

        if let Some(cached) = self.cache.lookup(model, prompt) {
            return Ok(cached);
        }

        let mut last_error = String::new();
        for attempt in 1..=self.max_retries {
            match self.generate_once(prompt, model) {
                Ok(text) => {
                    self.cache.store(model, prompt, &text);
                    return Ok(text);
                }
                Err(e) => {
                    warn!(
                        attempt,
                        max_retries = self.max_retries,
                        error = %format!("{e:#}"),
                        "generation attempt failed"
                    );
                    last_error = format!("{e:#}");
                    if attempt < self.max_retries {
                        thread::sleep(self.retry_delay);
                    }
                }
            }
        }

        Err(GatewayError::Generation(last_error))
    }
}

fn probe_http(client: &reqwest::blocking::Client, tags_url: &str) -> bool {
    match client.get(tags_url).timeout(PROBE_TIMEOUT).send() {
        Ok(response) => response.status().is_success(),
        Err(e) => {
            debug!(error = %e, "HTTP transport not reachable");
            false
        }
    }
}

fn probe_cli() -> bool {
    let mut command = Command::new(LOCAL_EXECUTABLE);
    command.arg("list");
    match run_with_timeout(command, PROBE_TIMEOUT) {
        Ok(output) => output.status.success(),
        Err(e) => {
            debug!(error = %format!("{e:#}"), "CLI transport not reachable");
            false
        }
    }
}

/// Captured output of a child process run under a deadline.
struct CapturedOutput {
    status: ExitStatus,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

/// Runs a command with piped output under a hard deadline. Output pipes are
/// drained on reader threads so a chatty child cannot block on a full pipe;
/// on expiry the child is killed and an error returned.
fn run_with_timeout(mut command: Command, timeout: Duration) -> anyhow::Result<CapturedOutput> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = command.spawn().context("failed to spawn child process")?;

    let stdout = child.stdout.take().context("child stdout not captured")?;
    let stderr = child.stderr.take().context("child stderr not captured")?;
    let stdout_reader = thread::spawn(move || drain(stdout));
    let stderr_reader = thread::spawn(move || drain(stderr));

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait().context("failed to poll child process")? {
            Some(status) => break status,
            None => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    // Let the readers finish; the pipes are closed now.
                    let _ = stdout_reader.join();
                    let _ = stderr_reader.join();
                    anyhow::bail!("child process timed out after {timeout:?}");
                }
                thread::sleep(Duration::from_millis(50));
            }
        }
    };

    let stdout = stdout_reader
        .join()
        .map_err(|_| anyhow::anyhow!("stdout reader thread panicked"))?;
    let stderr = stderr_reader
        .join()
        .map_err(|_| anyhow::anyhow!("stderr reader thread panicked"))?;

    Ok(CapturedOutput {
        status,
        stdout,
        stderr,
    })
}

fn drain(mut pipe: impl Read) -> Vec<u8> {
    let mut buf = Vec::new();
    let _ = pipe.read_to_end(&mut buf);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_with_timeout_captures_output() {
        let mut command = Command::new("sh");
        command.arg("-c").arg("echo out; echo err >&2");

        let output = run_with_timeout(command, Duration::from_secs(5)).unwrap();
        assert!(output.status.success());
        assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "out");
        assert_eq!(String::from_utf8_lossy(&output.stderr).trim(), "err");
    }

    #[test]
    fn test_run_with_timeout_kills_slow_child() {
        let mut command = Command::new("sh");
        command.arg("-c").arg("sleep 10");

        let started = Instant::now();
        let result = run_with_timeout(command, Duration::from_millis(200));
        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_run_with_timeout_nonzero_exit() {
        let mut command = Command::new("sh");
        command.arg("-c").arg("exit 3");

        let output = run_with_timeout(command, Duration::from_secs(5)).unwrap();
        assert!(!output.status.success());
    }

    #[test]
    fn test_gateway_error_display() {
        let unavailable = GatewayError::Unavailable;
        assert!(unavailable.to_string().contains("no generation transport"));

        let generation = GatewayError::Generation("connection refused".to_string());
        assert!(generation.to_string().contains("connection refused"));
    }
}
