pub const PLASMID_GPT_DISPLAY_VERSION: &str = env!("PLASMID_GPT_DISPLAY_VERSION");
pub const PLASMID_GPT_BUILD_N: &str = env!("PLASMID_GPT_BUILD_N");

pub fn version_cli_text() -> String {
    format!(
        "PlasmidGPT {}\nBuild {}\nPrompt-to-plasmid generation pipeline",
        PLASMID_GPT_DISPLAY_VERSION, PLASMID_GPT_BUILD_N
    )
}
