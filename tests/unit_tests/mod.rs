mod comm;
mod element;
mod meshloop;
