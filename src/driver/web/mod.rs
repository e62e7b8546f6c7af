mod driver;

pub use driver::{
    classify_console, locator_to_playwright, pick_match, BrowserType, WebProbe, WebProbeConfig,
    PAGE_ERROR_PREFIX, SOFTWARE_GL_ARGS,
};
