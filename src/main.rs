//! kshim demo client
//!
//! Loads the drivers into an emulated host and replays the reference
//! user-space clients against their device nodes.

use std::error::Error;
use std::sync::Arc;

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use log::LevelFilter;

use kshim::config::HostConfig;
use kshim::console;
use kshim::device::ds_routines::{
    ds_close, ds_fb_get_fix, ds_fb_get_var, ds_ioctl, ds_mmap, ds_munmap, ds_open, ds_read, ds_write,
};
use kshim::drivers::{self, counter, pm_hooks};
use kshim::kern::{SimHost, UserAddressSpace, UserPtr};

#[derive(Parser)]
#[command(name = "kshim")]
#[command(about = "Teaching device drivers on an emulated host kernel", long_about = None)]
struct Cli {
    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Echo the kernel log to stderr as it is written
    #[arg(long)]
    echo: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write text to the buffer device and read it back
    Chardev {
        /// Text to store
        text: String,
    },
    /// Drive the counter through its control codes
    Counter,
    /// Map the framebuffer and draw a test pattern
    Fb {
        #[arg(long, value_enum, default_value_t = Pattern::Bars)]
        pattern: Pattern,
    },
    /// Suspend and resume a power-management demo device
    Pm,
}

#[derive(Clone, Copy, ValueEnum)]
enum Pattern {
    Bars,
    Gradient,
    Shapes,
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    console::set_echo(cli.echo);
    let host = SimHost::new(HostConfig::new().with_log_level(level));
    let shim = host.shim();
    let loaded = drivers::init(&shim)?;

    match cli.command {
        Command::Chardev { text } => run_chardev(&host, &text)?,
        Command::Counter => run_counter(&host)?,
        Command::Fb { pattern } => run_fb(&host, pattern)?,
        Command::Pm => run_pm(&host)?,
    }

    drivers::exit(&shim, &loaded)?;

    if !cli.echo {
        println!("\n--- kernel log ---");
        for line in console::recent() {
            println!("{line}");
        }
    }
    Ok(())
}

fn run_chardev(host: &Arc<SimHost>, text: &str) -> Result<(), Box<dyn Error>> {
    let mm = host.spawn_process();
    let fd = ds_open(host.server(), &mm, "chardev_buffer")?;

    let buf = mm.map_anon(text.len().max(1))?;
    mm.write_bytes(buf, text.as_bytes())?;
    let written = ds_write(&fd, buf, text.len())?;
    println!("wrote {written} bytes");

    let out = mm.map_anon(drivers::chardev_buffer::CAP)?;
    let read = ds_read(&fd, out, drivers::chardev_buffer::CAP)?;
    let bytes = mm.read_bytes(out, read)?;
    println!("read {read} bytes: {}", String::from_utf8_lossy(&bytes));

    ds_close(&fd)?;
    Ok(())
}

fn run_counter(host: &Arc<SimHost>) -> Result<(), Box<dyn Error>> {
    let mm = host.spawn_process();
    let fd = ds_open(host.server(), &mm, "counter")?;
    let arg = mm.map_anon(4)?;

    let get = |label: &str| -> Result<(), Box<dyn Error>> {
        ds_ioctl(&fd, counter::COUNTER_GET, arg.addr())?;
        println!("{label}: {}", mm.read_u32(arg)? as i32);
        Ok(())
    };

    get("initial")?;
    for _ in 0..3 {
        ds_ioctl(&fd, counter::COUNTER_INCREMENT, 0)?;
    }
    get("after 3 increments")?;
    mm.write_u32(arg, 100)?;
    ds_ioctl(&fd, counter::COUNTER_SET, arg.addr())?;
    get("after set to 100")?;
    ds_ioctl(&fd, counter::COUNTER_RESET, 0)?;
    get("after reset")?;

    ds_close(&fd)?;
    Ok(())
}

fn run_fb(host: &Arc<SimHost>, pattern: Pattern) -> Result<(), Box<dyn Error>> {
    let mm = host.spawn_process();
    let fd = ds_open(host.server(), &mm, "display0")?;

    let var = ds_fb_get_var(&fd)?;
    let fix = ds_fb_get_fix(&fd)?;
    println!("Framebuffer info:");
    println!("  Resolution: {}x{}", var.xres, var.yres);
    println!("  Bits per pixel: {}", var.bits_per_pixel);
    println!("  Line length: {} bytes", fix.line_length);
    println!("  Buffer size: {} bytes", fix.smem_len);

    let size = (var.xres * var.yres * var.bytes_per_pixel()) as usize;
    let base = ds_mmap(&fd, size, 0)?;
    let canvas = Canvas {
        mm: mm.clone(),
        base,
        xres: var.xres as i32,
        yres: var.yres as i32,
    };

    match pattern {
        Pattern::Bars => canvas.color_bars()?,
        Pattern::Gradient => canvas.gradient()?,
        Pattern::Shapes => canvas.shapes()?,
    }

    // Read back through the node: the mapping and the store are the same pages
    let probe = mm.map_anon(4)?;
    ds_read(&fd, probe, 4)?;
    println!("pixel (0,0) via read: {:#010x}", mm.read_u32(probe)?);
    let center = ((var.yres / 2) * fix.line_length + (var.xres / 2) * 4) as usize;
    println!("pixel (center) via mapping: {:#010x}", mm.read_u32(UserPtr(base.addr() + center))?);

    ds_munmap(host.server(), &mm, base)?;
    ds_close(&fd)?;
    Ok(())
}

fn run_pm(host: &Arc<SimHost>) -> Result<(), Box<dyn Error>> {
    let shim = host.shim();
    let pdev = shim.add_platform_device("pm-demo@0", Some(pm_hooks::COMPATIBLE))?;
    println!("state after probe: {:?}", pm_hooks::state(&pdev));
    shim.system_suspend()?;
    println!("state after suspend: {:?}", pm_hooks::state(&pdev));
    shim.system_resume()?;
    println!("state after resume: {:?}", pm_hooks::state(&pdev));
    shim.remove_platform_device(&pdev)?;
    Ok(())
}

/// 32 bpp drawing surface seen through a user mapping
struct Canvas {
    mm: Arc<UserAddressSpace>,
    base: UserPtr,
    xres: i32,
    yres: i32,
}

impl Canvas {
    fn pixel(&self, x: i32, y: i32, color: u32) -> Result<(), Box<dyn Error>> {
        if (0..self.xres).contains(&x) && (0..self.yres).contains(&y) {
            let offset = ((y * self.xres + x) * 4) as usize;
            self.mm.write_u32(UserPtr(self.base.addr() + offset), color)?;
        }
        Ok(())
    }

    fn row(&self, y: i32, x: i32, pixels: &[u32]) -> Result<(), Box<dyn Error>> {
        let bytes: Vec<u8> = pixels.iter().flat_map(|p| p.to_ne_bytes()).collect();
        let offset = ((y * self.xres + x) * 4) as usize;
        self.mm.write_bytes(UserPtr(self.base.addr() + offset), &bytes)?;
        Ok(())
    }

    fn fill_rect(&self, x: i32, y: i32, width: i32, height: i32, color: u32) -> Result<(), Box<dyn Error>> {
        let x0 = x.clamp(0, self.xres);
        let x1 = (x + width).clamp(0, self.xres);
        if x1 <= x0 {
            return Ok(());
        }
        let span = vec![color; (x1 - x0) as usize];
        for row in y.max(0)..(y + height).min(self.yres) {
            self.row(row, x0, &span)?;
        }
        Ok(())
    }

    fn clear(&self, color: u32) -> Result<(), Box<dyn Error>> {
        self.fill_rect(0, 0, self.xres, self.yres, color)
    }

    /// Bresenham line
    fn line(&self, mut x0: i32, mut y0: i32, x1: i32, y1: i32, color: u32) -> Result<(), Box<dyn Error>> {
        let dx = (x1 - x0).abs();
        let dy = (y1 - y0).abs();
        let sx = if x0 < x1 { 1 } else { -1 };
        let sy = if y0 < y1 { 1 } else { -1 };
        let mut err = dx - dy;

        loop {
            self.pixel(x0, y0, color)?;
            if x0 == x1 && y0 == y1 {
                return Ok(());
            }
            let e2 = 2 * err;
            if e2 > -dy {
                err -= dy;
                x0 += sx;
            }
            if e2 < dx {
                err += dx;
                y0 += sy;
            }
        }
    }

    /// Midpoint circle
    fn circle(&self, cx: i32, cy: i32, radius: i32, color: u32) -> Result<(), Box<dyn Error>> {
        let (mut x, mut y) = (0, radius);
        let mut d = 3 - 2 * radius;
        while x <= y {
            for (px, py) in [(x, y), (-x, y), (x, -y), (-x, -y), (y, x), (-y, x), (y, -x), (-y, -x)] {
                self.pixel(cx + px, cy + py, color)?;
            }
            if d < 0 {
                d += 4 * x + 6;
            } else {
                d += 4 * (x - y) + 10;
                y -= 1;
            }
            x += 1;
        }
        Ok(())
    }

    fn color_bars(&self) -> Result<(), Box<dyn Error>> {
        println!("Drawing color bars...");
        const COLORS: [u32; 8] = [
            0xFFFFFFFF, // white
            0xFFFFFF00, // yellow
            0xFF00FFFF, // cyan
            0xFF00FF00, // green
            0xFFFF00FF, // magenta
            0xFFFF0000, // red
            0xFF0000FF, // blue
            0xFF000000, // black
        ];
        let bar = self.xres / 8;
        for (i, color) in COLORS.iter().enumerate() {
            self.fill_rect(i as i32 * bar, 0, bar, self.yres, *color)?;
        }
        Ok(())
    }

    fn gradient(&self) -> Result<(), Box<dyn Error>> {
        println!("Drawing gradient...");
        for y in 0..self.yres {
            let g = (y * 255 / self.yres) as u32;
            let row: Vec<u32> = (0..self.xres)
                .map(|x| {
                    let r = (x * 255 / self.xres) as u32;
                    0xFF00_0000 | (r << 16) | (g << 8) | 128
                })
                .collect();
            self.row(y, 0, &row)?;
        }
        Ok(())
    }

    fn shapes(&self) -> Result<(), Box<dyn Error>> {
        println!("Drawing shapes...");
        let (w, h) = (self.xres - 1, self.yres - 1);
        self.clear(0xFF000000)?;
        self.fill_rect(50, 50, 200, 150, 0xFFFF0000)?;
        self.fill_rect(300, 100, 150, 200, 0xFF00FF00)?;
        self.circle(400, 300, 80, 0xFF0000FF)?;
        self.line(0, 0, w, h, 0xFFFFFF00)?;
        self.line(0, h, w, 0, 0xFFFFFF00)?;
        self.line(0, 0, w, 0, 0xFFFFFFFF)?;
        self.line(w, 0, w, h, 0xFFFFFFFF)?;
        self.line(w, h, 0, h, 0xFFFFFFFF)?;
        self.line(0, h, 0, 0, 0xFFFFFFFF)?;
        Ok(())
    }
}
