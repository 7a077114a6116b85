// myq3-common — foundational types shared by the renderer crates.

pub mod files;
pub mod q_shared;
