pub mod actor;

pub use actor::{COMPANY_ID_HEADER, ROLE_HEADER, TENANT_ID_HEADER, USER_ID_HEADER};
