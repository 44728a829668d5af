pub mod obj;
pub mod patient;
pub mod mesh_stream;

pub use obj::{decode_obj, parse_obj};
pub use patient::{decode_patient, read_patient_header};
pub use mesh_stream::decode_mesh_stream;
