pub mod excel_read;
pub mod excel_write;
pub mod raster_read;
pub mod table;
pub mod vector_read;
