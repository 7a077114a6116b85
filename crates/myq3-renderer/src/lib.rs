// myq3-renderer — id Tech 3 renderer core: the texture/image pipeline and
// the per-frame dynamic light interaction system, driving an opaque
// graphics device.

pub mod device;
pub mod tr_image;
pub mod tr_image_program;
pub mod tr_light;
pub mod tr_local;
