// App Constants
pub const APP_NAME: &str = "SheetShell";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const CONFIG_DIR_NAME: &str = "sheetshell";
pub const APP_BINARY: &str = "sheetshell";

// Deployment mode override: "development" or "packaged"
pub const DEPLOYMENT_MODE_ENV: &str = "SHEETSHELL_MODE";

// File handling
pub const REQUIRED_EXTENSION: &str = "xlsx";
pub const OUTPUT_SUFFIX: &str = "_processed";
pub const FILE_FILTER_LABEL: &str = "Excel workbook";

// Backend layout
pub const BACKEND_SCRIPT: &str = "python/processor.py";
pub const BACKEND_EXECUTABLE_STEM: &str = "processor";

// Backend exit code convention
pub const EXIT_CODE_CONTENT_ERROR: i32 = 2;

// UI limits
pub const MAX_LOG_LINES: usize = 1000;

// Release feed
pub const GITHUB_API_BASE: &str = "https://api.github.com/repos";
pub const REPO_OWNER: &str = "yourusername";
pub const REPO_NAME: &str = "sheetshell";
pub const HTTP_TIMEOUT_SECONDS: u64 = 30;
