use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;

use bytes::Bytes;
use frame_types::ImageFormat;
use log::debug;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;

use super::error::ExtractError;
use super::options::ExtractOptions;
use super::source::ByteSource;

/// Where the encoder reads the video from.
#[derive(Clone, Copy, Debug)]
pub enum EncoderInput<'a> {
    File(&'a Path),
    /// Piped into stdin.
    Stdin,
}

/**
    Arguments for an `image2pipe` run that writes one image every
    `interval_secs` seconds, at most `max_frames` of them, to stdout.
*/
pub fn encoder_args(
    input: EncoderInput<'_>,
    options: &ExtractOptions,
    interval_secs: f64,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["-hide_banner".into(), "-loglevel".into(), "error".into()];

    match input {
        EncoderInput::File(path) => {
            args.push("-nostdin".into());
            args.push("-i".into());
            args.push(path.as_os_str().to_owned());
        }
        EncoderInput::Stdin => {
            args.push("-i".into());
            args.push("pipe:0".into());
        }
    }

    args.push("-vf".into());
    args.push(format!("fps=1/{}", interval_secs).into());
    args.push("-frames:v".into());
    args.push(options.max_frames.to_string().into());
    args.push("-f".into());
    args.push("image2pipe".into());
    args.push("-c:v".into());
    args.push(options.format.ffmpeg_codec().into());
    if options.format == ImageFormat::Jpeg {
        args.push("-q:v".into());
        args.push("2".into());
    }
    args.push("pipe:1".into());
    args
}

/// A running encoder with its pipes taken.
pub struct Encoder {
    pub child: Child,
    pub stdout: ChildStdout,
    pub stderr: Option<ChildStderr>,
    pub stdin: Option<ChildStdin>,
}

pub fn spawn_encoder(
    program: &Path,
    input: EncoderInput<'_>,
    options: &ExtractOptions,
    interval_secs: f64,
    id: &str,
) -> Result<Encoder, ExtractError> {
    let args = encoder_args(input, options, interval_secs);
    debug!("[encoder:{}] {} {:?}", id, program.display(), args);

    let stdin = match input {
        EncoderInput::File(_) => Stdio::null(),
        EncoderInput::Stdin => Stdio::piped(),
    };

    let mut child = Command::new(program)
        .args(&args)
        .stdin(stdin)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ExtractError::Spawn {
            program: program.display().to_string(),
            source,
        })?;

    let stdout = child.stdout.take().ok_or_else(|| {
        ExtractError::Io(std::io::Error::other("encoder stdout was not captured"))
    })?;
    let stderr = child.stderr.take();
    let stdin = child.stdin.take();

    Ok(Encoder {
        child,
        stdout,
        stderr,
        stdin,
    })
}

/**
    Copy a chained source into the encoder's stdin, starting with the chunk
    already read from it. Closing stdin at the end lets the encoder see EOF.
*/
pub fn spawn_feeder(
    id: &str,
    mut stdin: ChildStdin,
    first: Bytes,
    mut source: ByteSource,
) -> JoinHandle<()> {
    let id = id.to_string();
    tokio::spawn(async move {
        let result = async {
            stdin.write_all(&first).await?;
            let copied = tokio::io::copy(&mut source, &mut stdin).await?;
            stdin.shutdown().await?;
            Ok::<u64, std::io::Error>(copied + first.len() as u64)
        }
        .await;

        match result {
            Ok(total) => debug!("[feeder:{}] piped {} bytes", id, total),
            // The encoder closes stdin once it has enough frames.
            Err(e) => debug!("[feeder:{}] stopped: {}", id, e),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use super::super::options::Interval;

    fn strings(args: Vec<OsString>) -> Vec<String> {
        args.into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_file_input_png() {
        let options = ExtractOptions {
            max_frames: 3,
            interval: Interval::Seconds(5.0),
            format: ImageFormat::Png,
        };
        let args = strings(encoder_args(
            EncoderInput::File(Path::new("/tmp/w/source.video")),
            &options,
            5.0,
        ));
        let expected = "-hide_banner -loglevel error -nostdin -i /tmp/w/source.video \
            -vf fps=1/5 -frames:v 3 -f image2pipe -c:v png pipe:1";
        assert_eq!(args, expected.split_whitespace().collect::<Vec<_>>());
    }

    #[test]
    fn test_stdin_input_jpeg() {
        let options = ExtractOptions {
            max_frames: 10,
            interval: Interval::Auto,
            format: ImageFormat::Jpeg,
        };
        let args = strings(encoder_args(EncoderInput::Stdin, &options, 0.5));
        assert!(!args.contains(&"-nostdin".to_string()));
        assert!(args.windows(2).any(|w| w == ["-i", "pipe:0"]));
        assert!(args.windows(2).any(|w| w == ["-vf", "fps=1/0.5"]));
        assert!(args.windows(2).any(|w| w == ["-c:v", "mjpeg"]));
        assert!(args.windows(2).any(|w| w == ["-q:v", "2"]));
        assert_eq!(args.last().map(String::as_str), Some("pipe:1"));
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let err = spawn_encoder(
            Path::new("/nonexistent/ffmpeg"),
            EncoderInput::Stdin,
            &ExtractOptions::default(),
            1.0,
            "t",
        )
        .err()
        .unwrap();
        assert!(matches!(err, ExtractError::Spawn { .. }));
    }
}
