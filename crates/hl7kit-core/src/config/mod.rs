//! Configuration system for hl7kit
//!
//! Configuration is looked up by walking from the working directory toward
//! the filesystem root, taking the first of `.hl7kitrc.json`,
//! `.hl7kitrc.toml`, `hl7kit.yaml`, `hl7kit.yml` or `hl7kit.json`. All
//! sections are optional; missing values fall back to the parser and
//! validator defaults.
//!
//! ## Example Configuration
//!
//! ```jsonc
//! {
//!   "parser": {
//!     "strict": false,
//!     "allowUnknownStructures": true,
//!     "defaultVersion": "2.5"
//!   },
//!   "validation": {
//!     "enabled": true,
//!     "minDatePrecision": "day",
//!     "rules": {
//!       "field/max-length": "off",
//!       "table/value": "error"
//!     }
//!   },
//!   "definitions": {
//!     "paths": ["./site-segments.yaml"]
//!   },
//!   "files": {
//!     "include": ["**/*.hl7"],
//!     "exclude": ["**/archive/**"]
//!   }
//! }
//! ```

mod hl7kit_config;
mod loader;

pub use hl7kit_config::{
    DefinitionsConfiguration, FilesConfiguration, Hl7kitConfig, ParserConfiguration,
    ValidationConfiguration,
};
pub use loader::{CONFIG_FILE_NAMES, ConfigLoader, LoadedConfig};
