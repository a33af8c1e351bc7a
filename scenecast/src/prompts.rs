//! System prompts, prompt builders, and deterministic fallback texts.
//!
//! Everything in this module is embedded in the binary so that fallback
//! producers stay dependency-free.

/// Default system style prompt for technical explainer videos.
pub const STYLE_PROMPT: &str = "\
You are an expert technical writer and educator producing short explainer \
videos from engineering documentation. Your audience is practising \
engineers and technical staff.

Style guidelines:
- Professional, clear, concise language
- Focus on practical applications and real-world scenarios
- Emphasise safety-critical and compliance-relevant points
- Break complex concepts into digestible steps

Visual guidelines:
- White or light backgrounds
- Clean technical diagrams with high-contrast colours
- Minimise decorative elements; favour information density
";

/// Deterministic substitute summary used when the model is unavailable.
pub const FALLBACK_SUMMARY: &str = "Overview of the supplied technical \
documentation, covering its main concepts, safety considerations, and \
practical guidance for engineering staff.";

/// Minimal scene source guaranteed to render: one slide, white background.
pub const SCAFFOLD_SCENE: &str = r#"scene Overview {
  background white
  slide 1 {
    title "Overview"
    text "This video summarises the supplied document."
    wait 30
  }
}
"#;

/// Prompt for the ~100-word summary (stage 2).
#[must_use]
pub fn summary_prompt(style: &str, markdown: &str) -> String {
    format!(
        "{style}\n\
         Task: Write a concise 100-word summary of the following Markdown \
         document. Focus on the main technical concepts, key safety or \
         compliance points, and critical takeaways.\n\n\
         Markdown document:\n{markdown}\n\n\
         Provide only the summary text, with no additional commentary."
    )
}

/// Prompt for the base animation script and timing list (stage 3).
#[must_use]
pub fn base_script_prompt(style: &str, summary: &str) -> String {
    format!(
        "{style}\n\
         Task: Write an animation scene in the scenecast scene language for \
         an educational video based on the content below.\n\n\
         Requirements:\n\
         - The first directive inside the scene block must be `background white`\n\
         - 4-6 slides with clear titles and transitions\n\
         - Each slide ends with a `wait` directive of 20-30 seconds for narration\n\n\
         Also produce a timings object with the format:\n\
         {{\"slides\": [{{\"slide_no\": 1, \"duration\": 25, \"title\": \"Introduction\"}}]}}\n\n\
         Content summary:\n{summary}\n\n\
         Format the two outputs as:\n\
         ```scene\n(scene source here)\n```\n\n\
         ```json\n(timings here)\n```"
    )
}

/// Prompt for image queries and layout hints (stage 4).
#[must_use]
pub fn image_plan_prompt(style: &str, script_summary: &str) -> String {
    format!(
        "{style}\n\
         Task: Suggest supporting images and slide layouts for the video \
         described below.\n\n\
         Image requirements:\n\
         - Specific, technical search queries (diagrams, charts, photographs)\n\
         - At most 4 images in total, target resolution 800x600\n\n\
         Layout requirements:\n\
         - Text on the left (about 60% width), image on the right\n\
         - Positions are [x, y, z] scene coordinates\n\n\
         Video description:\n{script_summary}\n\n\
         Provide two JSON arrays, in this order and nothing else:\n\
         ```json\n[{{\"slide_no\": 1, \"search_query\": \"...\", \"alt_text\": \"...\"}}]\n```\n\n\
         ```json\n[{{\"slide_no\": 1, \"text_pos\": [-3, 0, 0], \"text_width\": 0.6, \
         \"img_pos\": [3, 0, 0], \"img_scale\": 0.8}}]\n```"
    )
}

/// Prompt for per-slide narration (stage 8).
#[must_use]
pub fn narration_prompt(style: &str, slides_json: &str, images_json: &str) -> String {
    format!(
        "{style}\n\
         Task: Write natural, professional narration for each slide of the \
         video. Match each slide's duration, reference the visuals where it \
         helps, and keep the pacing natural for text-to-speech.\n\n\
         Slide information:\n{slides_json}\n\n\
         Image descriptions:\n{images_json}\n\n\
         Provide only a JSON array:\n\
         [{{\"slide_no\": 1, \"duration\": 25, \"narration_text\": \"...\"}}]"
    )
}

/// Deterministic substitute narration for one slide.
#[must_use]
pub fn fallback_narration(title: &str) -> String {
    format!("This slide covers {title}. Please refer to the visual content for detailed information.")
}
