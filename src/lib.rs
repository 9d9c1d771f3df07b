pub mod error;
pub mod model;
pub mod boundary;
pub mod varint;
pub mod grid;
pub mod format;
pub mod io_stream;
pub mod pump;
pub mod handle;

pub use error::{Result, VoxelError};
pub use model::{Block, BlockState, Position, StateInterner};
pub use boundary::{AxisOrder, Boundary};
pub use format::{FormatHint, SchematicFormat, WriteOptions};
pub use io_stream::{BlockSink, BlockSource, DEFAULT_BUFFER_SIZE};
pub use pump::{convert, convert_path, pump, PumpStats};
pub use handle::HandleTable;
