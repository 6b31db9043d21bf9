//! Bounded reads from interactive shells.

use sshmux_core::{ShellChannel, ShellReadLimits, TransportError};
use tokio::time::Instant;

/// Output gathered by [`read_bounded`].
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CollectedOutput {
    pub bytes: Vec<u8>,
    /// A time or size bound ended the read, not idleness.
    pub truncated: bool,
}

/// Read shell output until it goes idle or a bound is hit.
///
/// Waits up to `max_wait` for the first chunk. After that, reading stops
/// once no data arrives for `idle`, the total time reaches `max_wait`, or
/// `max_output_bytes` have been collected.
///
/// # Errors
///
/// Returns the channel error if the shell fails or closes mid-read.
pub async fn read_bounded(
    shell: &mut dyn ShellChannel,
    limits: &ShellReadLimits,
) -> Result<CollectedOutput, TransportError> {
    let deadline = Instant::now() + limits.max_wait();
    let mut bytes = Vec::new();

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(CollectedOutput {
                bytes,
                truncated: true,
            });
        }

        let wait = if bytes.is_empty() {
            remaining
        } else {
            limits.idle().min(remaining)
        };

        match shell.read_available(wait).await? {
            Some(chunk) => {
                bytes.extend_from_slice(&chunk);
                if bytes.len() >= limits.max_output_bytes {
                    bytes.truncate(limits.max_output_bytes);
                    return Ok(CollectedOutput {
                        bytes,
                        truncated: true,
                    });
                }
            }
            // Timed out. Only a wait cut short by the deadline counts as truncation.
            None => {
                return Ok(CollectedOutput {
                    bytes,
                    truncated: wait == remaining,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::VecDeque, time::Duration};

    use async_trait::async_trait;

    use super::*;

    /// Emits queued chunks after a fixed delay each, then goes quiet.
    struct ScriptedShell {
        chunks: VecDeque<(Duration, Vec<u8>)>,
        endless: bool,
    }

    #[async_trait]
    impl ShellChannel for ScriptedShell {
        async fn write(&mut self, _data: &[u8]) -> Result<(), TransportError> {
            Ok(())
        }

        async fn read_available(
            &mut self,
            wait: Duration,
        ) -> Result<Option<Vec<u8>>, TransportError> {
            if self.endless {
                tokio::time::sleep(Duration::from_millis(10).min(wait)).await;
                return Ok(Some(b"y\n".to_vec()));
            }
            match self.chunks.front() {
                Some((delay, _)) if *delay <= wait => {
                    let (delay, chunk) = self.chunks.pop_front().unwrap_or_default();
                    tokio::time::sleep(delay).await;
                    Ok(Some(chunk))
                }
                Some((delay, _)) => {
                    let delay = *delay;
                    tokio::time::sleep(wait).await;
                    if let Some(front) = self.chunks.front_mut() {
                        front.0 = delay - wait;
                    }
                    Ok(None)
                }
                None => {
                    tokio::time::sleep(wait).await;
                    Ok(None)
                }
            }
        }

        async fn close(&mut self) -> Result<(), TransportError> {
            Ok(())
        }
    }

    fn scripted(chunks: &[(u64, &str)]) -> ScriptedShell {
        ScriptedShell {
            chunks: chunks
                .iter()
                .map(|(ms, s)| (Duration::from_millis(*ms), s.as_bytes().to_vec()))
                .collect(),
            endless: false,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_when_output_goes_idle() {
        let mut shell = scripted(&[(50, "hello "), (100, "world"), (1_000, "late")]);
        let limits = ShellReadLimits::default();

        let collected = read_bounded(&mut shell, &limits).await.unwrap();

        assert_eq!(collected.bytes, b"hello world");
        assert!(!collected.truncated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_slow_first_chunk() {
        let mut shell = scripted(&[(5_000, "done")]);
        let limits = ShellReadLimits::default();

        let collected = read_bounded(&mut shell, &limits).await.unwrap();

        assert_eq!(collected.bytes, b"done");
        assert!(!collected.truncated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_shell_hits_deadline() {
        let mut shell = scripted(&[]);
        let limits = ShellReadLimits {
            max_wait_secs: 2,
            ..ShellReadLimits::default()
        };

        let start = Instant::now();
        let collected = read_bounded(&mut shell, &limits).await.unwrap();

        assert!(collected.bytes.is_empty());
        assert!(collected.truncated);
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_endless_output_is_capped_by_time() {
        let mut shell = ScriptedShell {
            chunks: VecDeque::new(),
            endless: true,
        };
        let limits = ShellReadLimits {
            max_wait_secs: 1,
            ..ShellReadLimits::default()
        };

        let start = Instant::now();
        let collected = read_bounded(&mut shell, &limits).await.unwrap();

        assert!(collected.truncated);
        assert!(start.elapsed() <= Duration::from_secs(1));
        assert!(collected.bytes.starts_with(b"y\ny\n"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_endless_output_is_capped_by_size() {
        let mut shell = ScriptedShell {
            chunks: VecDeque::new(),
            endless: true,
        };
        let limits = ShellReadLimits {
            max_output_bytes: 9,
            ..ShellReadLimits::default()
        };

        let collected = read_bounded(&mut shell, &limits).await.unwrap();

        assert!(collected.truncated);
        assert_eq!(collected.bytes, b"y\ny\ny\ny\ny");
    }
}
