//! Everything the driver needs after emission to turn machine code bytes
//! into a callable function: executable memory, the code cache, the
//! function table and PLT, the helper registry, and the native call
//! bridge.

pub mod call_bridge;
pub mod code_cache;
pub mod function_table;
pub mod helpers;
pub mod page;

pub use call_bridge::call_bridge;
pub use code_cache::{CodeCache, InstalledEntry};
pub use function_table::{FunctionTable, Plt};
pub use helpers::HelperRegistry;
pub use page::{ExecPage, PageAllocator};
