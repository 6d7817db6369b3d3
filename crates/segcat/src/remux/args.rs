use super::RemuxFormat;
use crate::media::MediaProfile;

const FRAGMENT_MOVFLAGS: &str = "empty_moov+default_base_moof+skip_trailer";

fn to_args(args: &[&str]) -> Vec<String> {
    args.iter().map(|arg| arg.to_string()).collect()
}

fn muxer_args(format: RemuxFormat, min_frag_duration: u64) -> Vec<String> {
    match format {
        RemuxFormat::FragmentedMp4 => vec![
            "-f".to_string(),
            "mp4".to_string(),
            "-min_frag_duration".to_string(),
            min_frag_duration.to_string(),
            "-movflags".to_string(),
            FRAGMENT_MOVFLAGS.to_string(),
        ],
        RemuxFormat::MpegTs => to_args(&[
            "-muxpreload",
            "0",
            "-muxdelay",
            "0",
            "-max_interleave_delta",
            "0",
            "-flush_packets",
            "0",
            "-f",
            "mpegts",
        ]),
    }
}

/// Arguments that copy the streams of stdin into the output container.
pub fn remux_args(format: RemuxFormat, trim: Option<f64>) -> Vec<String> {
    let mut args = to_args(&["-hide_banner", "-thread_queue_size", "4096"]);
    match format {
        RemuxFormat::FragmentedMp4 => {
            args.extend(to_args(&["-i", "-", "-c", "copy", "-bsf:a", "aac_adtstoasc"]));
        }
        RemuxFormat::MpegTs => {
            args.extend(to_args(&[
                "-dts_delta_threshold",
                "1",
                "-i",
                "-",
                "-c",
                "copy",
                "-fflags",
                "+shortest+genpts",
            ]));
        }
    }
    if let Some(trim) = trim.filter(|t| *t > 0.0) {
        args.push("-t".to_string());
        args.push(format!("{trim:.6}"));
    }
    args.extend(muxer_args(format, 10_000_000));
    args.push("-".to_string());
    args
}

/// Arguments that take video from stdin and audio from file descriptor 3.
pub fn merge_args(format: RemuxFormat) -> Vec<String> {
    let mut args = to_args(&[
        "-hide_banner",
        "-thread_queue_size",
        "4096",
        "-i",
        "-",
        "-thread_queue_size",
        "4096",
        "-i",
        "pipe:3",
        "-c",
        "copy",
        "-map",
        "0:v",
        "-map",
        "1:a",
    ]);
    if format == RemuxFormat::FragmentedMp4 {
        args.extend(to_args(&["-bsf:a", "aac_adtstoasc"]));
    }
    args.extend(muxer_args(format, 10_000_000));
    args.push("-".to_string());
    args
}

/// Arguments that render `duration` seconds of black frames and silence
/// encoded as described by `profile`.
pub fn filler_args(format: RemuxFormat, profile: &MediaProfile, duration: f64) -> Vec<String> {
    let video = &profile.video;
    let audio = &profile.audio;
    let (with_video, with_audio) = (video.is_enabled(), audio.is_enabled());

    let mut args = to_args(&["-hide_banner", "-v", "quiet"]);
    if with_video {
        args.extend([
            "-f".to_string(),
            "lavfi".to_string(),
            "-i".to_string(),
            format!(
                "color=black:s={}x{}:r={:.6}",
                video.width, video.height, video.fps
            ),
        ]);
    }
    if with_audio {
        args.extend(to_args(&["-f", "lavfi", "-i", "anullsrc"]));
    }

    if with_video {
        args.extend([
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
            "-r".to_string(),
            format!("{:.6}", video.fps),
            "-c:v".to_string(),
            video.codec.clone(),
        ]);
        match format {
            RemuxFormat::FragmentedMp4 => args.extend(to_args(&[
                "-video_track_timescale",
                "12800",
                "-g",
                "1",
                "-forced-idr",
                "1",
                "-x264opts",
                "scenecut=0:stitchable=1:repeat-headers=1:nal-hrd=cbr",
            ])),
            RemuxFormat::MpegTs => args.extend(to_args(&["-enc_time_base", "1/12800"])),
        }
        args.extend([
            "-profile".to_string(),
            video.profile.clone(),
            "-level".to_string(),
            video.level.clone(),
            "-b:v".to_string(),
            video.bitrate.to_string(),
        ]);
    }

    if with_audio {
        args.extend([
            "-c:a".to_string(),
            audio.codec.clone(),
            "-ar".to_string(),
            audio.sample_rate.to_string(),
            "-b:a".to_string(),
            audio.bitrate.to_string(),
            "-ac".to_string(),
            audio.channels.to_string(),
        ]);
    }

    args.push("-t".to_string());
    args.push(format!("{duration:.6}"));
    if format == RemuxFormat::MpegTs {
        args.push("-copyts".to_string());
    }
    args.extend(muxer_args(format, 20_000_000));
    args.push("-".to_string());
    args
}
