mod connect;
mod session;

const fn main() {}
