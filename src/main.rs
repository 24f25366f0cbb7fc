use anyhow::{Context, bail};
use clap::{Arg, Command, value_parser};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use streamview::config::{PipelineConfig, app_name, version};
use streamview::decoder::annexb::split_access_units;
use streamview::decoder::{CodecKind, FfmpegProvider};
use streamview::display::HeadlessSink;
use streamview::pipeline::{DecodeStage, PipelineController, PipelineStage};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let matches = Command::new(app_name())
        .version(version())
        .author(env!("CARGO_PKG_AUTHORS"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .arg(
            Arg::new("input")
                .value_name("INPUT")
                .help("Annex B elementary stream to replay.")
                .required(true)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("codec")
                .short('c')
                .long("codec")
                .value_name("CODEC")
                .help("Codec of the input stream, overrides the config file.")
                .value_parser(["h264", "hevc"]),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("FILE")
                .help("Pipeline configuration (JSON).")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("fps")
                .long("fps")
                .value_name("N")
                .help("Packet rate, 0 replays as fast as the queue accepts.")
                .default_value("60")
                .value_parser(value_parser!(u32)),
        )
        .arg(
            Arg::new("dump")
                .long("dump")
                .value_name("FILE")
                .help("Write the last presented frame as PPM.")
                .value_parser(value_parser!(PathBuf)),
        )
        .get_matches();

    let mut config = match matches.get_one::<PathBuf>("config") {
        Some(path) => PipelineConfig::from_json_file(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(codec) = matches.get_one::<String>("codec") {
        config.codec = codec.parse::<CodecKind>().map_err(anyhow::Error::msg)?;
    }
    let codec = config.codec;
    if codec == CodecKind::Av1 {
        bail!("AV1 is not carried in Annex B streams, pick h264 or hevc");
    }

    let input = matches
        .get_one::<PathBuf>("input")
        .context("missing input")?;
    let stream = std::fs::read(input).with_context(|| format!("cannot read {}", input.display()))?;
    let units = split_access_units(codec, &stream);
    if units.is_empty() {
        bail!("no {} access units found in {}", codec, input.display());
    }
    log::info!(
        "{} {}: replaying {} access units from {}",
        app_name(),
        version(),
        units.len(),
        input.display()
    );

    let (controller, receiver) = PipelineController::new(Box::new(FfmpegProvider), config);
    let stop = controller.stop_handle();
    let (mut stage, ingress) = DecodeStage::new(controller, codec);
    let health = Arc::clone(stage.health());

    let mut keyframe_requests = stage.take_keyframe_requests();
    tokio::spawn(async move {
        while let Some(sequence) = keyframe_requests.recv().await {
            log::info!("keyframe requested after packet #{}", sequence);
        }
    });

    {
        let stop = stop.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                stop.cancel();
            }
        });
    }

    let presentation = std::thread::Builder::new()
        .name("presentation".to_string())
        .spawn(move || receiver.attach(HeadlessSink::new()).run_blocking())
        .context("cannot spawn presentation thread")?;

    let decode = tokio::spawn(async move { stage.run().await });

    let fps = *matches.get_one::<u32>("fps").unwrap_or(&60);
    let mut pacing = (fps > 0).then(|| tokio::time::interval(Duration::from_secs(1) / fps));
    for (sequence, unit) in units.into_iter().enumerate() {
        if stop.cancelled() || ingress.is_closed() {
            break;
        }
        match pacing.as_mut() {
            Some(interval) => {
                interval.tick().await;
            }
            None => tokio::task::yield_now().await,
        }
        ingress.offer(unit.into_packet(sequence as u64));
    }
    drop(ingress);

    decode.await.context("decode task panicked")??;
    let sink = presentation
        .join()
        .map_err(|_| anyhow::anyhow!("presentation thread panicked"))?;

    println!("{}", health.summary());
    let (width, height) = sink.size();
    println!(
        "presented {} frames, last at {}x{} ({} surface reallocations)",
        sink.frames_written(),
        width,
        height,
        sink.resizes()
    );

    if let Some(path) = matches.get_one::<PathBuf>("dump") {
        if sink.frames_written() == 0 {
            bail!("nothing was presented, {} not written", path.display());
        }
        sink.dump_ppm(path)
            .with_context(|| format!("cannot write {}", path.display()))?;
        println!("last frame written to {}", path.display());
    }

    Ok(())
}
