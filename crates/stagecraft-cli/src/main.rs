use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use stagecraft_contracts::events::{EventPayload, EventWriter};
use stagecraft_contracts::palette::BrushColor;
use stagecraft_contracts::requests::{BackgroundRequest, InpaintRequest};
use stagecraft_contracts::session::{Mode, Session};
use stagecraft_engine::composite;
use stagecraft_engine::export;
use stagecraft_engine::mask::MaskPainter;
use stagecraft_engine::normalize;
use stagecraft_engine::orchestrate::{self, RetryPolicy};
use stagecraft_engine::remote::{prompt_digest, GeminiClient, OfflineClient, SceneModelClient};

const GENERATION_LOADING_MESSAGE: &str = "魔法師正在詠唱咒語...";
const INPAINT_LOADING_MESSAGE: &str = "魔法師正在進行內繪咒語...";

#[derive(Debug, Parser)]
#[command(name = "stagecraft", version, about = "Product-photo staging studio")]
struct Cli {
    /// Use the deterministic offline client instead of the remote service.
    #[arg(long, global = true)]
    offline: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Suggest three staged scenes for an uploaded subject photo.
    Analyze(AnalyzeArgs),
    /// Make one small adjustment to a creative instruction.
    Enhance(EnhanceArgs),
    /// Generate four background viewpoints for a subject photo.
    Generate(GenerateArgs),
    /// Paint a mask over a base image and request localized edits.
    Inpaint(InpaintArgs),
    /// Export images with or without the watermark seal.
    Export(ExportArgs),
}

#[derive(Debug, Parser)]
struct AnalyzeArgs {
    /// Subject photo to analyze.
    image: PathBuf,
    #[arg(long, default_value = "")]
    subject_name: String,
    #[arg(long, default_value = "")]
    subject_dimensions: String,
    #[arg(long, default_value = "")]
    subject_relation: String,
}

#[derive(Debug, Parser)]
struct EnhanceArgs {
    prompt: String,
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    /// Subject photo to stage.
    image: PathBuf,
    #[arg(long)]
    prompt: String,
    #[arg(long, default_value = "")]
    negative: String,
    #[arg(long, default_value = "")]
    subject_name: String,
    /// Enhance the prompt before generating, as a rerun would.
    #[arg(long)]
    enhance: bool,
    #[arg(long)]
    out: PathBuf,
}

#[derive(Debug, Parser)]
struct InpaintArgs {
    /// Base image to edit (typically a previous result).
    image: PathBuf,
    /// Subject photo whose appearance the edit should inject.
    #[arg(long)]
    subject: Option<PathBuf>,
    /// Stroke `color:x,y x,y ...`, repeatable, applied in order.
    #[arg(long = "stroke")]
    strokes: Vec<String>,
    /// Region instruction `color=text`, repeatable.
    #[arg(long = "instruction")]
    instructions: Vec<String>,
    /// Brush diameter in canvas pixels.
    #[arg(long)]
    brush_size: Option<f32>,
    /// Logical canvas size stroke coordinates refer to.
    #[arg(long, default_value_t = 1024)]
    canvas_size: u32,
    #[arg(long, default_value = "")]
    negative: String,
    #[arg(long, default_value = "")]
    subject_name: String,
    #[arg(long)]
    out: PathBuf,
}

#[derive(Debug, Parser)]
struct ExportArgs {
    /// Images to export, in selection order.
    inputs: Vec<PathBuf>,
    #[arg(long)]
    out: PathBuf,
    /// Apply the watermark seal.
    #[arg(long)]
    watermark: bool,
    /// Local watermark file instead of the remote asset.
    #[arg(long)]
    watermark_file: Option<PathBuf>,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("stagecraft error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let client = build_client(cli.offline);
    match cli.command {
        Command::Analyze(args) => run_analyze(args, client.as_ref()),
        Command::Enhance(args) => run_enhance(args, client.as_ref()),
        Command::Generate(args) => run_generate(args, client.as_ref()),
        Command::Inpaint(args) => run_inpaint(args, client.as_ref()),
        Command::Export(args) => run_export(args),
    }
}

fn build_client(offline: bool) -> Box<dyn SceneModelClient> {
    if offline {
        Box::new(OfflineClient::new())
    } else {
        Box::new(GeminiClient::new())
    }
}

fn run_analyze(args: AnalyzeArgs, client: &dyn SceneModelClient) -> Result<()> {
    let subject_details = [
        args.subject_name.trim(),
        args.subject_dimensions.trim(),
        args.subject_relation.trim(),
    ]
    .into_iter()
    .filter(|part| !part.is_empty())
    .collect::<Vec<&str>>()
    .join(" ");
    if subject_details.is_empty() {
        bail!("請至少提供一項主體屬性，以利場景預言。");
    }

    let uploaded = read_image(&args.image)?;
    let optimized = normalize::optimize_upload(&uploaded)?;
    let analysis = client.analyze(&optimized, &subject_details)?;

    for (theme, suggestion) in analysis.themes() {
        println!("【{theme}】");
        println!("指令：{}", suggestion.prompt);
        println!("視覺焦點：{}", suggestion.focus);
        println!("光線提醒：{}", suggestion.lighting);
        println!();
    }
    Ok(())
}

fn run_enhance(args: EnhanceArgs, client: &dyn SceneModelClient) -> Result<()> {
    println!("{}", client.enhance(&args.prompt)?);
    Ok(())
}

fn run_generate(args: GenerateArgs, client: &dyn SceneModelClient) -> Result<()> {
    let mut session = Session::new();
    session.select_mode(Mode::AddBackground);

    let uploaded = read_image(&args.image)?;
    let optimized = normalize::optimize_upload(&uploaded)?;
    session.set_upload(uploaded, optimized.clone());

    let mut user_prompt = args.prompt.clone();
    if args.enhance {
        user_prompt = client.enhance(&user_prompt)?;
        println!("強化後指令：{user_prompt}");
    }

    let request = BackgroundRequest::new(
        optimized,
        user_prompt,
        args.negative.clone(),
        args.subject_name.clone(),
    )?;
    session.begin_generation(
        request.prompt.clone(),
        request.negative_prompt.clone(),
        GENERATION_LOADING_MESSAGE,
    );

    let events = EventWriter::new(args.out.join("events.jsonl"), session.id());
    events.emit(
        "generation_started",
        payload(json!({
            "mode": "add-background",
            "prompt_digest": prompt_digest(&request.prompt),
            "viewpoints": 4,
        })),
    )?;

    match orchestrate::generate_batch(client, &request, RetryPolicy::default()) {
        Ok(images) => {
            session.finish_generation(images.clone());
            let timestamp = export::export_timestamp();
            let written = export::export_images(&args.out, &images, None, &timestamp)?;
            events.emit(
                "generation_completed",
                payload(json!({ "count": written.len() })),
            )?;
            for path in written {
                println!("{}", path.display());
            }
            Ok(())
        }
        Err(err) => {
            fail_session(&mut session, &events, "generation_failed", err)
        }
    }
}

fn run_inpaint(args: InpaintArgs, client: &dyn SceneModelClient) -> Result<()> {
    let mut session = Session::new();
    let base_uploaded = read_image(&args.image)?;
    let base_png = normalize::reencode_png(&base_uploaded)?;
    session.start_inpainting(base_png.clone());

    let subject = match &args.subject {
        Some(path) => Some(normalize::optimize_upload(&read_image(path)?)?),
        None => None,
    };

    let mut painter = MaskPainter::new(args.canvas_size, args.canvas_size)?;
    if let Some(size) = args.brush_size {
        painter.set_brush_size(size);
    }
    for raw in &args.strokes {
        let (color, points) = parse_stroke(raw)?;
        painter.set_brush_color(color);
        let mut points = points.into_iter();
        if let Some(first) = points.next() {
            painter.begin_stroke(first);
            for point in points {
                painter.continue_stroke(point);
            }
            painter.end_stroke();
        }
    }
    for raw in &args.instructions {
        let (color, text) = parse_instruction(raw)?;
        painter.set_instruction(color, text);
    }

    let mask = painter.export_mask()?;
    let request = InpaintRequest::new(
        base_png,
        mask,
        painter.is_mask_empty(),
        painter.regions(),
        subject,
        args.negative.clone(),
        args.subject_name.clone(),
    )?;
    session.begin_generation(
        request.prompt.clone(),
        request.negative_prompt.clone(),
        INPAINT_LOADING_MESSAGE,
    );

    let events = EventWriter::new(args.out.join("events.jsonl"), session.id());
    events.emit(
        "inpaint_started",
        payload(json!({
            "mode": "inpainting",
            "prompt_digest": prompt_digest(&request.prompt),
            "regions": request.prompt.lines().count(),
        })),
    )?;

    match orchestrate::inpaint(client, &request) {
        Ok(image) => {
            session.finish_inpaint(image.clone());
            let timestamp = export::export_timestamp();
            let written = export::export_images(&args.out, &[image], None, &timestamp)?;
            events.emit("inpaint_completed", payload(json!({ "count": 1 })))?;
            for path in written {
                println!("{}", path.display());
            }
            Ok(())
        }
        Err(err) => fail_session(&mut session, &events, "inpaint_failed", err),
    }
}

fn run_export(args: ExportArgs) -> Result<()> {
    if args.inputs.is_empty() {
        bail!("請至少選取一張圖片才能下載。");
    }
    let images = args
        .inputs
        .iter()
        .map(|path| read_image(path))
        .collect::<Result<Vec<Vec<u8>>>>()?;

    let mark = if args.watermark {
        Some(match &args.watermark_file {
            Some(path) => read_image(path)?,
            None => composite::fetch_watermark()?,
        })
    } else {
        None
    };

    let timestamp = export::export_timestamp();
    let written = export::export_images(&args.out, &images, mark.as_deref(), &timestamp)?;
    for path in written {
        println!("{}", path.display());
    }
    Ok(())
}

/// Record the failure, return the user-facing message as the error. The
/// session keeps its inputs so the caller can retry without re-entering
/// anything.
fn fail_session(
    session: &mut Session,
    events: &EventWriter,
    event_type: &str,
    err: anyhow::Error,
) -> Result<()> {
    let message = format!("{err:#}");
    session.fail_generation(message.clone());
    events.emit(event_type, payload(json!({ "error": message.clone() })))?;
    bail!("{}", session.error.clone().unwrap_or(message));
}

fn read_image(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("failed reading {}", path.display()))
}

fn payload(value: Value) -> EventPayload {
    value.as_object().cloned().unwrap_or_default()
}

/// `color:x,y x,y ...`: a brush color followed by one or more points.
fn parse_stroke(raw: &str) -> Result<(BrushColor, Vec<(f32, f32)>)> {
    let Some((color_raw, points_raw)) = raw.split_once(':') else {
        bail!("stroke must look like color:x,y x,y (got '{raw}')");
    };
    let color = BrushColor::parse(color_raw)
        .with_context(|| format!("unknown brush color '{color_raw}'"))?;
    let points = points_raw
        .split_whitespace()
        .map(parse_point)
        .collect::<Result<Vec<(f32, f32)>>>()?;
    if points.is_empty() {
        bail!("stroke '{raw}' has no points");
    }
    Ok((color, points))
}

fn parse_point(raw: &str) -> Result<(f32, f32)> {
    let Some((x, y)) = raw.split_once(',') else {
        bail!("point must look like x,y (got '{raw}')");
    };
    let x = x.trim().parse::<f32>().with_context(|| format!("bad x in '{raw}'"))?;
    let y = y.trim().parse::<f32>().with_context(|| format!("bad y in '{raw}'"))?;
    Ok((x, y))
}

/// `color=text`: region instruction for one brush color.
fn parse_instruction(raw: &str) -> Result<(BrushColor, String)> {
    let Some((color_raw, text)) = raw.split_once('=') else {
        bail!("instruction must look like color=text (got '{raw}')");
    };
    let color = BrushColor::parse(color_raw)
        .with_context(|| format!("unknown brush color '{color_raw}'"))?;
    Ok((color, text.to_string()))
}
