mod auth;
mod class;
mod drive;
mod relay;
mod sheets;

pub use auth::{
    AuthError, DRIVE_SCOPE, SHEETS_SCOPE, ServiceAccountAuth, ServiceAccountKey, TokenSource,
};
pub use class::ApiErrorClass;
pub use drive::{DriveClient, DriveError, folder_id_from_url};
pub use relay::{RelayClient, RelayError, RelayFile, RelayResponse};
pub use sheets::{
    CellUpdate, SheetsClient, SheetsError, column_letter, rowcol_to_a1, worksheet_range,
};
